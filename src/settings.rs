use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

/// How a chat decides whether enough members took part in a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumStrategy {
    RatioAndCount,
    RatioOnly,
    CountOnly,
}

impl fmt::Display for QuorumStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QuorumStrategy::RatioAndCount => "ratio_and_count",
            QuorumStrategy::RatioOnly => "ratio_only",
            QuorumStrategy::CountOnly => "count_only",
        })
    }
}

/// What happens to the offender once a case is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforceAction {
    Ban,
    Kick,
    DeleteOnly,
    Mute,
}

impl fmt::Display for EnforceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EnforceAction::Ban => "ban",
            EnforceAction::Kick => "kick",
            EnforceAction::DeleteOnly => "delete_only",
            EnforceAction::Mute => "mute",
        })
    }
}

/// The parameters governing voting in one chat. A validated copy of this
/// struct is embedded into every case at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ChatSettings {
    /// Minimum voters / chat members ratio.
    pub min_participation_ratio: f64,
    /// Absolute minimum number of voters.
    pub min_participation_count: i32,
    /// Required share of Spam votes among all votes cast.
    pub approval_ratio: f64,
    pub quorum_strategy: QuorumStrategy,
    pub action_on_confirm: EnforceAction,
    pub mute_duration_sec: i64,
    pub blacklist_enabled: bool,
    /// Voting window in seconds for each case.
    pub vote_timeout_sec: i64,
    pub allow_vote_retract: bool,
    /// Per-reporter cap on cases opened within a trailing hour.
    pub max_cases_per_user_hour: i32,
}

impl Default for ChatSettings {
    fn default() -> ChatSettings {
        ChatSettings {
            min_participation_ratio: 0.05,
            min_participation_count: 5,
            approval_ratio: 0.6,
            quorum_strategy: QuorumStrategy::RatioAndCount,
            action_on_confirm: EnforceAction::Ban,
            mute_duration_sec: 3600,
            blacklist_enabled: true,
            vote_timeout_sec: 14400,
            allow_vote_retract: true,
            max_cases_per_user_hour: 3,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("unknown setting `{0}`")]
    UnknownField(String),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
    #[error("`{field}` must be {requirement}")]
    OutOfRange {
        field: &'static str,
        requirement: &'static str,
    },
}

impl ChatSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(0.0..=1.0).contains(&self.min_participation_ratio) {
            return Err(SettingsError::OutOfRange {
                field: "min_participation_ratio",
                requirement: "between 0 and 1",
            });
        }
        if !(0.0..=1.0).contains(&self.approval_ratio) {
            return Err(SettingsError::OutOfRange {
                field: "approval_ratio",
                requirement: "between 0 and 1",
            });
        }
        if self.min_participation_count < 1 {
            return Err(SettingsError::OutOfRange {
                field: "min_participation_count",
                requirement: "at least 1",
            });
        }
        if self.mute_duration_sec < 60 {
            return Err(SettingsError::OutOfRange {
                field: "mute_duration_sec",
                requirement: "at least 60 seconds",
            });
        }
        if self.vote_timeout_sec < 30 {
            return Err(SettingsError::OutOfRange {
                field: "vote_timeout_sec",
                requirement: "at least 30 seconds",
            });
        }
        if self.max_cases_per_user_hour < 1 {
            return Err(SettingsError::OutOfRange {
                field: "max_cases_per_user_hour",
                requirement: "at least 1",
            });
        }
        Ok(())
    }
}

/// Merge a chat's stored override map onto the global defaults. Unknown keys
/// and type mismatches are rejected before the merge is accepted, and the
/// merged result is re-checked against every bound, so an override can never
/// produce an invalid snapshot.
pub fn resolve(
    defaults: &ChatSettings,
    overrides: Option<&Map<String, Value>>,
) -> Result<ChatSettings, SettingsError> {
    let base =
        serde_json::to_value(defaults).map_err(|e| SettingsError::InvalidValue(e.to_string()))?;
    let mut merged = match base {
        Value::Object(map) => map,
        _ => {
            return Err(SettingsError::InvalidValue(
                "defaults did not serialize to an object".to_string(),
            ))
        }
    };
    if let Some(overrides) = overrides {
        for (key, value) in overrides {
            if !merged.contains_key(key) {
                return Err(SettingsError::UnknownField(key.clone()));
            }
            merged.insert(key.clone(), value.clone());
        }
    }
    let resolved: ChatSettings = serde_json::from_value(Value::Object(merged))
        .map_err(|e| SettingsError::InvalidValue(e.to_string()))?;
    resolved.validate()?;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn overrides(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn no_overrides_yields_defaults() {
        let defaults = ChatSettings::default();
        let resolved = resolve(&defaults, None).unwrap();
        assert_eq!(resolved, defaults);
    }

    #[test]
    fn overrides_replace_only_named_fields() {
        let defaults = ChatSettings::default();
        let map = overrides(&[
            ("approval_ratio", json!(0.75)),
            ("quorum_strategy", json!("count_only")),
            ("allow_vote_retract", json!(false)),
        ]);
        let resolved = resolve(&defaults, Some(&map)).unwrap();
        assert_eq!(resolved.approval_ratio, 0.75);
        assert_eq!(resolved.quorum_strategy, QuorumStrategy::CountOnly);
        assert!(!resolved.allow_vote_retract);
        assert_eq!(
            resolved.min_participation_count,
            defaults.min_participation_count
        );
    }

    #[test]
    fn unknown_field_is_rejected() {
        let map = overrides(&[("min_praticipation_count", json!(4))]);
        let err = resolve(&ChatSettings::default(), Some(&map)).unwrap_err();
        assert_eq!(
            err,
            SettingsError::UnknownField("min_praticipation_count".to_string())
        );
    }

    #[test]
    fn wrong_type_is_rejected() {
        let map = overrides(&[("min_participation_count", json!("five"))]);
        assert!(matches!(
            resolve(&ChatSettings::default(), Some(&map)),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn out_of_range_override_is_rejected() {
        let map = overrides(&[("approval_ratio", json!(1.5))]);
        assert_eq!(
            resolve(&ChatSettings::default(), Some(&map)).unwrap_err(),
            SettingsError::OutOfRange {
                field: "approval_ratio",
                requirement: "between 0 and 1",
            }
        );

        let map = overrides(&[("vote_timeout_sec", json!(5))]);
        assert!(matches!(
            resolve(&ChatSettings::default(), Some(&map)),
            Err(SettingsError::OutOfRange { field: "vote_timeout_sec", .. })
        ));
    }

    #[test]
    fn unknown_enum_value_is_rejected() {
        let map = overrides(&[("action_on_confirm", json!("shadowban"))]);
        assert!(matches!(
            resolve(&ChatSettings::default(), Some(&map)),
            Err(SettingsError::InvalidValue(_))
        ));
    }
}
