//! ncloud-lb-controller: LoadBalancer Services on Naver Cloud
//!
//! This crate provides a Kubernetes controller that backs `type: LoadBalancer`
//! Services with Naver Cloud Platform network load balancers, target groups
//! and listeners, and publishes the resulting address on the Service.

pub mod cloud;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
