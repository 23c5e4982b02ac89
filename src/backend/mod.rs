//! Conversion backends and chain assembly.

pub mod command;
pub mod native;

use crate::config::PipelineConfig;
use crate::converter::ConversionChain;
use anyhow::{bail, Result};
use command::CommandAdapter;
use native::NativeDxfAdapter;

/// Identifier of the in-process backend.
pub const NATIVE_ADAPTER: &str = "native";

/// Builds the chain in the configured order.
///
/// Ids other than [`NATIVE_ADAPTER`] must match a configured command
/// adapter; unknown ids are rejected before anything runs.
pub fn build_chain(config: &PipelineConfig) -> Result<ConversionChain> {
    let mut chain = ConversionChain::new();

    for id in &config.adapters {
        if id == NATIVE_ADAPTER {
            chain.push(id.clone(), Box::new(NativeDxfAdapter));
            continue;
        }

        match config.commands.iter().find(|spec| &spec.id == id) {
            Some(spec) => chain.push(id.clone(), Box::new(CommandAdapter::new(spec.clone()))),
            None => bail!("unknown conversion adapter: {id}"),
        }
    }

    if chain.is_empty() {
        bail!("no conversion adapters configured");
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chain_order() {
        let chain = build_chain(&PipelineConfig::default()).unwrap();
        assert_eq!(chain.adapter_ids(), vec!["native", "ezdxf", "oda-dxf2svg", "inkscape"]);
    }

    #[test]
    fn test_override_order() {
        let config = PipelineConfig {
            adapters: vec!["inkscape".to_string(), "native".to_string()],
            ..PipelineConfig::default()
        };
        let chain = build_chain(&config).unwrap();
        assert_eq!(chain.adapter_ids(), vec!["inkscape", "native"]);
    }

    #[test]
    fn test_unknown_adapter_rejected() {
        let config = PipelineConfig {
            adapters: vec!["native".to_string(), "autocad".to_string()],
            ..PipelineConfig::default()
        };
        let err = build_chain(&config).unwrap_err();
        assert!(err.to_string().contains("autocad"));
    }

    #[test]
    fn test_empty_order_rejected() {
        let config = PipelineConfig {
            adapters: vec![],
            ..PipelineConfig::default()
        };
        assert!(build_chain(&config).is_err());
    }
}
