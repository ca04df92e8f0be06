//! Deterministic cloud resource names
//!
//! Provider names must start with a letter, contain only `[a-z0-9-]`, be 3 to 30
//! characters long and not end with a hyphen.

const MAX_NAME_LEN: usize = 30;
const MIN_NAME_LEN: usize = 3;
const FALLBACK_PREFIX: &str = "tg-";
const FALLBACK_NAME: &str = "tg-default";

const LOAD_BALANCER_PREFIX: &str = "k8s-lb";
const TARGET_GROUP_PREFIX: &str = "tg";

/// Build a provider-valid name from `prefix-namespace-name-suffix`.
///
/// Empty parts are skipped and the `default` namespace is omitted.
pub fn generate_valid_name(prefix: &str, namespace: &str, name: &str, suffix: &str) -> String {
    let parts: Vec<&str> = [prefix, namespace, name, suffix]
        .iter()
        .enumerate()
        .filter(|(i, p)| !p.is_empty() && !(*i == 1 && **p == "default"))
        .map(|(_, p)| *p)
        .collect();

    let mut out = String::with_capacity(MAX_NAME_LEN + FALLBACK_PREFIX.len());
    for c in parts.join("-").to_lowercase().chars() {
        let keep = c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-';
        if !keep || (c == '-' && out.ends_with('-')) {
            continue;
        }
        out.push(c);
    }
    let mut out = out.trim_matches('-').to_string();

    if out.is_empty() {
        return FALLBACK_NAME.to_string();
    }
    if !out.starts_with(|c: char| c.is_ascii_lowercase()) {
        out.insert_str(0, FALLBACK_PREFIX);
    }

    out.truncate(MAX_NAME_LEN);
    let out = out.trim_end_matches('-');

    if out.len() < MIN_NAME_LEN {
        return format!("{FALLBACK_PREFIX}{out}");
    }
    out.to_string()
}

/// Name of the load balancer owned by a Service
pub fn load_balancer_name(namespace: &str, name: &str) -> String {
    generate_valid_name(LOAD_BALANCER_PREFIX, namespace, name, "")
}

/// Name of the target group backing the port at `index`
pub fn target_group_name(namespace: &str, name: &str, index: usize) -> String {
    generate_valid_name(TARGET_GROUP_PREFIX, namespace, name, &index.to_string())
}

/// Name keyed by protocol and port, used when the positional name is held by
/// another port's target group
pub fn target_group_port_name(namespace: &str, name: &str, protocol: &str, port: i32) -> String {
    generate_valid_name(TARGET_GROUP_PREFIX, namespace, name, &format!("{protocol}-{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_valid(name: &str) -> bool {
        let bytes = name.as_bytes();
        name.len() >= MIN_NAME_LEN
            && name.len() <= MAX_NAME_LEN
            && bytes[0].is_ascii_lowercase()
            && (bytes[bytes.len() - 1].is_ascii_lowercase() || bytes[bytes.len() - 1].is_ascii_digit())
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !name.contains("--")
    }

    #[test]
    fn test_default_namespace_is_omitted() {
        assert_eq!(generate_valid_name("tg", "default", "web", "0"), "tg-web-0");
        assert_eq!(generate_valid_name("tg", "shop", "web", "0"), "tg-shop-web-0");
        assert_eq!(load_balancer_name("default", "web"), "k8s-lb-web");
        assert_eq!(target_group_name("prod", "api", 2), "tg-prod-api-2");
        assert_eq!(target_group_port_name("prod", "api", "TCP", 8443), "tg-prod-api-tcp-8443");
    }

    #[test]
    fn test_sanitization() {
        assert_eq!(
            generate_valid_name("LB", "My_Namespace", "my.service", "HTTP"),
            "lb-mynamespace-myservice-http"
        );
        assert_eq!(
            generate_valid_name("lb", "my--namespace", "my---service", "80"),
            "lb-my-namespace-my-service-80"
        );
    }

    #[test]
    fn test_leading_digit_gets_prefix() {
        let name = generate_valid_name("123lb", "456ns", "789svc", "0");
        assert!(name.starts_with("tg-123lb"));
        assert!(is_valid(&name));
    }

    #[test]
    fn test_truncation_never_ends_with_hyphen() {
        let long = "very-long-service-name".repeat(10);
        let name = generate_valid_name("tg", "default", &long, "0");
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(is_valid(&name), "{name}");

        // cut lands right after a hyphen
        let name = generate_valid_name("tg", "default", "abcdefghijklmnopqrstuvwxyz-z", "");
        assert_eq!(name, "tg-abcdefghijklmnopqrstuvwxyz");
    }

    #[test]
    fn test_degenerate_inputs_fall_back() {
        assert_eq!(generate_valid_name("", "", "", ""), FALLBACK_NAME);
        assert_eq!(generate_valid_name("___", "...", "###", "!!!"), FALLBACK_NAME);
        assert_eq!(generate_valid_name("a", "", "", ""), "tg-a");
        assert!(is_valid(&generate_valid_name("", "", "7", "")));
    }

    #[test]
    fn test_names_are_deterministic_and_valid() {
        let inputs = [
            ("lb", "default", "test-service", "80"),
            ("tg", "kube-system", "Ingress_NGINX", "1"),
            ("k8s-lb", "a", "b", ""),
            ("", "123namespace", "test", ""),
            ("tg", "default", "test", "123"),
        ];
        for (p, ns, n, s) in inputs {
            let first = generate_valid_name(p, ns, n, s);
            assert_eq!(first, generate_valid_name(p, ns, n, s));
            assert!(is_valid(&first), "{first}");
        }
    }
}
