//! Alarm definitions attached to every load-balancer stack.
//!
//! Definitions come from an orchestrator config resource. Each data value holds
//! a YAML list of alarms. Stacks record a structural hash of the definitions so
//! regenerated but equivalent definitions do not cause updates.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::errors::Result;

/// Orchestrator-side configuration resource (namespace, name, string data).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigResource {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Metric dimension of an alarm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AlarmDimension {
    pub name: String,
    pub value: String,
}

/// One metric alarm, in the provider's vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AlarmDefinition {
    pub alarm_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm_description: Option<String>,
    pub metric_name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub statistic: String,
    pub period: u32,
    pub evaluation_periods: u32,
    pub threshold: f64,
    pub comparison_operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<AlarmDimension>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alarm_actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treat_missing_data: Option<String>,
}

fn default_namespace() -> String {
    "AWS/ApplicationELB".to_string()
}

/// Ordered set of alarm definitions shared by all stacks in a pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmSet(Vec<AlarmDefinition>);

impl AlarmSet {
    pub fn new(definitions: Vec<AlarmDefinition>) -> Self {
        Self(definitions)
    }

    /// Parse every data value of `resource` as a YAML list of alarm definitions.
    /// Values are taken in key order so the resulting hash is stable.
    pub fn from_config_resource(resource: &ConfigResource) -> Result<Self> {
        let mut definitions = Vec::new();
        for (key, value) in &resource.data {
            let parsed: Vec<AlarmDefinition> = serde_yaml::from_str(value).map_err(|e| {
                crate::errors::ControllerError::from(e).with_context(format!(
                    "alarm config {}/{} key {}",
                    resource.namespace, resource.name, key
                ))
            })?;
            definitions.extend(parsed);
        }
        Ok(Self(definitions))
    }

    pub fn definitions(&self) -> &[AlarmDefinition] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Hex SHA-256 of the canonical JSON form; `None` when there are no alarms.
    pub fn hash(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        let canonical = serde_json::to_vec(&self.0).ok()?;
        Some(hex::encode(Sha256::digest(&canonical)))
    }
}
