//! Domain layer
//!
//! Pure types for the reconciliation engine with no dependency on any
//! collaborator. Everything here can be tested without mocks.
//!
//! ## Module Organization
//!
//! - `id`: NewType identifiers and the closed string enum helper
//! - `endpoint`: orchestrator-declared endpoints and their kinds
//! - `certificate`: certificate summaries from certificate sources
//! - `stack`: provisioned stacks and the typed tag bag
//! - `descriptor`: desired load-balancer state and stack requests
//! - `alarm`: alarm definitions and their structural hash

pub mod alarm;
pub mod certificate;
pub mod descriptor;
pub mod endpoint;
pub mod id;
pub mod stack;

pub use alarm::{AlarmDefinition, AlarmDimension, AlarmSet, ConfigResource};
pub use certificate::CertificateSummary;
pub use descriptor::{CompatibilityKey, LoadBalancerDescriptor, ObservedStack, StackSpec};
pub use endpoint::{Endpoint, EndpointId, EndpointKind, IpAddressType, LoadBalancerType, Scheme};
pub use id::{CertificateId, InstanceId, StackName};
pub use stack::{CertificateSchedule, Stack, StackStatus, StackTags};
