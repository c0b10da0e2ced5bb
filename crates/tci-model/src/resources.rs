use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Requested run resources as kubernetes-style quantity strings
/// (`"500m"`, `"2Gi"`). Empty means "no request".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub memory: String,
    #[serde(default)]
    pub disk: String,
}

impl Resources {
    /// Check that every non-empty quantity at least looks like one:
    /// a leading digit followed by digits, a dot, or a unit suffix.
    pub fn validate(&self) -> ModelResult<()> {
        for (name, value) in [
            ("cpu", &self.cpu),
            ("memory", &self.memory),
            ("disk", &self.disk),
        ] {
            if value.is_empty() {
                continue;
            }

            let quantity_like = value.starts_with(|c: char| c.is_ascii_digit())
                && value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.');
            if !quantity_like {
                return Err(ModelError::InvalidQuantity {
                    name,
                    value: value.clone(),
                });
            }
        }

        Ok(())
    }

    /// Iterate the non-empty requests as `(resource, quantity)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("cpu", self.cpu.as_str()),
            ("memory", self.memory.as_str()),
            ("storage", self.disk.as_str()),
        ]
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_resources_are_valid() {
        Resources::default().validate().expect("empty is fine");
    }

    #[test]
    fn quantity_strings_pass_validation() {
        let res = Resources {
            cpu: "500m".to_string(),
            memory: "2Gi".to_string(),
            disk: "10G".to_string(),
        };
        res.validate().expect("quantities should validate");

        let pairs: Vec<_> = res.iter().collect();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[2], ("storage", "10G"));
    }

    #[test]
    fn junk_quantities_are_rejected() {
        let res = Resources {
            cpu: "lots".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            res.validate(),
            Err(ModelError::InvalidQuantity { name: "cpu", .. })
        ));
    }
}
