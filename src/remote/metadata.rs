use std::{
    env,
    process::Command,
    sync::OnceLock,
};

use log::{
    debug, warn
};

use super::{
    backend::{
        Properties, PropertyValue,
    },
    freshness::date_to_millis,
    Orchestrator,
};
use crate::inputs::Inputs;

pub const TIMESTAMP_PROPERTY: &str = "system:time_start";
pub const PROVENANCE_PROPERTY: &str = "sha";

// property keys only survive with plain word characters
const INPUT_KEY_LEN: usize = 10;

fn key_segment(raw: &str, max_len: usize) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .take(max_len)
        .collect()
}

/// Flatten input descriptors into `inputs__{name}__{field}` properties.
pub fn flatten_inputs(inputs: &Inputs) -> Properties {
    let mut properties = Properties::new();
    for (name, input) in inputs {
        let name = key_segment(name, INPUT_KEY_LEN);
        for (field, value) in input.fields() {
            properties.insert(format!("inputs__{name}__{field}"), value);
        }
    }
    properties
}

/// Source revision of the running code, looked up once per process.
///
/// `SOURCE_REVISION` wins; otherwise `git rev-parse HEAD`. Any failure just
/// means no provenance.
pub fn provenance() -> Option<&'static str> {
    static REVISION: OnceLock<Option<String>> = OnceLock::new();
    REVISION
        .get_or_init(|| {
            if let Ok(rev) = env::var("SOURCE_REVISION") {
                if false == rev.trim().is_empty() {
                    return Some(rev.trim().to_string());
                }
            }
            Command::new("git")
                .args(["rev-parse", "HEAD"])
                .output()
                .ok()
                .filter(|output| output.status.success())
                .and_then(|output| String::from_utf8(output.stdout).ok())
                .map(|s| s.trim().to_string())
                .filter(|s| false == s.is_empty())
        })
        .as_deref()
}

impl Orchestrator {
    /// Properties stamped onto every export: the task date as the canonical
    /// timestamp, the provenance revision when known, and the flattened
    /// inputs, capped to the backend's property limit.
    pub fn export_properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.insert(
            TIMESTAMP_PROPERTY.to_string(),
            PropertyValue::Number(date_to_millis(self.taskdate)),
        );
        if let Some(rev) = provenance() {
            properties.insert(PROVENANCE_PROPERTY.to_string(), PropertyValue::Text(rev.to_string()));
        }

        let room = self.limits.max_properties.saturating_sub(properties.len());
        let flattened = flatten_inputs(&self.inputs);
        if flattened.len() > room {
            warn!(
                "Only {room} of {} input properties fit on the export, dropping the rest.",
                flattened.len()
            );
        }
        properties.extend(flattened.into_iter().take(room));
        debug!("Export properties: {properties:?}");
        properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::NaiveDate;

    use crate::{
        inputs::{
            InputSpec, InputSpecs,
        },
        remote::{
            memory::MemoryBackend,
            ExportLimits,
        },
        task::TaskOptions,
    };

    fn inputs() -> Inputs {
        InputSpecs::new()
            .with(
                "population_density",
                InputSpec::image_collection()
                    .path("projects/HII/v1/source/population_density")
                    .maxage(1),
            )
            .with("water-mask", InputSpec::image().path("projects/HII/v1/source/water").fixed())
            .resolve(&())
    }

    #[test]
    fn input_keys_are_truncated_and_namespaced() {
        let properties = flatten_inputs(&inputs());
        assert_eq!(
            properties.get("inputs__population__maxage"),
            Some(&PropertyValue::Number(1))
        );
        assert_eq!(
            properties.get("inputs__population__remote_type"),
            Some(&PropertyValue::Text("ImageCollection".to_string()))
        );
        assert!(properties.contains_key("inputs__water_mask__static"));
        assert_eq!(properties.len(), 6);
    }

    #[test]
    fn timestamp_comes_from_taskdate() {
        let options = TaskOptions::default()
            .with_taskdate(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        let orch = Orchestrator::new(Arc::new(MemoryBackend::new()), "projects/HII/v1", &options)
            .unwrap()
            .with_inputs(inputs());
        let properties = orch.export_properties();
        assert_eq!(
            properties.get(TIMESTAMP_PROPERTY),
            Some(&PropertyValue::Number(1_704_844_800_000))
        );
        assert!(properties.contains_key("inputs__population__remote_path"));
    }

    #[test]
    fn property_cap_is_respected() {
        let orch = Orchestrator::new(Arc::new(MemoryBackend::new()), "projects/HII/v1", &TaskOptions::default())
            .unwrap()
            .with_inputs(inputs())
            .with_limits(ExportLimits { max_pixels: 1, max_properties: 3 });
        let properties = orch.export_properties();
        assert_eq!(properties.len(), 3);
        assert!(properties.contains_key(TIMESTAMP_PROPERTY));
    }
}
