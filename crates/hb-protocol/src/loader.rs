use crate::subscription::UNBOUNDED;
use crate::types::Code;
use anyhow::Context;
use hb_transport::DeliveryClass;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Link setup read from YAML: which values the board should stream back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_class")]
    pub default_class: DeliveryClass,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionPlan>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            name: None,
            default_class: default_class(),
            subscriptions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub code: Code,
    #[serde(default = "unbounded")]
    pub count: i32,
    pub period_ms: u32,
    #[serde(default)]
    pub class: Option<DeliveryClass>,
}

fn default_class() -> DeliveryClass {
    DeliveryClass::NoAck
}

fn unbounded() -> i32 {
    UNBOUNDED
}

pub fn parse_link_config(raw: &str) -> anyhow::Result<LinkConfig> {
    let cfg: LinkConfig = serde_yaml::from_str(raw).context("parsing link config")?;
    Ok(cfg)
}

pub fn load_link_config(path: impl AsRef<Path>) -> anyhow::Result<LinkConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading link config: {}", path.display()))?;
    parse_link_config(&raw).with_context(|| format!("decoding link config: {}", path.display()))
}
