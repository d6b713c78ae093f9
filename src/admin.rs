use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use serenity::prelude::TypeMapKey;
use thiserror::Error;

use crate::database::Database;
use crate::settings::{self, ChatSettings, SettingsError};
use crate::transport::ChatTransport;

const ADMIN_CACHE_TTL: Duration = Duration::from_secs(300);
const STATS_CASE_COUNT: i64 = 5;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0}")]
    Settings(#[from] SettingsError),
    #[error("{0}")]
    BadInput(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Time-bounded memo of each guild's administrator set, refreshed on miss or
/// expiry so permission checks do not hammer the transport.
struct AdminCache {
    ttl: Duration,
    entries: Mutex<HashMap<i64, (Instant, HashSet<i64>)>>,
}

impl AdminCache {
    fn new(ttl: Duration) -> AdminCache {
        AdminCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, guild_id: i64) -> Option<HashSet<i64>> {
        let entries = self.entries.lock().unwrap();
        match entries.get(&guild_id) {
            Some((expires, ids)) if *expires > Instant::now() => Some(ids.clone()),
            _ => None,
        }
    }

    fn put(&self, guild_id: i64, ids: HashSet<i64>) {
        self.entries
            .lock()
            .unwrap()
            .insert(guild_id, (Instant::now() + self.ttl, ids));
    }
}

/// Owner checks, per-chat settings editing, statistics and manual blacklist
/// management for the command surface.
pub struct AdminService {
    db: Arc<Database>,
    transport: Arc<dyn ChatTransport>,
    defaults: ChatSettings,
    owner_ids: HashSet<i64>,
    cache: AdminCache,
}

impl AdminService {
    pub fn new(
        db: Arc<Database>,
        transport: Arc<dyn ChatTransport>,
        defaults: ChatSettings,
        owner_ids: Vec<i64>,
    ) -> AdminService {
        AdminService {
            db,
            transport,
            defaults,
            owner_ids: owner_ids.into_iter().collect(),
            cache: AdminCache::new(ADMIN_CACHE_TTL),
        }
    }

    /// Bot owners always pass; everyone else must be in the guild's
    /// administrator set. A transport failure shows up as an empty set and
    /// the check fails closed until the cache entry expires.
    pub async fn ensure_admin(&self, user_id: i64, guild_id: i64) -> bool {
        if self.owner_ids.contains(&user_id) {
            return true;
        }
        let ids = match self.cache.get(guild_id) {
            Some(ids) => ids,
            None => {
                let ids = match self.transport.admin_ids(guild_id).await {
                    Ok(ids) => ids,
                    Err(e) => {
                        warn!("failed to fetch admin list for guild {}: {:#}", guild_id, e);
                        HashSet::new()
                    }
                };
                self.cache.put(guild_id, ids.clone());
                ids
            }
        };
        ids.contains(&user_id)
    }

    pub async fn show_settings(&self, guild_id: i64) -> Result<String, anyhow::Error> {
        let overrides = self.db.get_chat_settings(guild_id).await?;
        let effective = settings::resolve(&self.defaults, overrides.as_ref())?;
        let title = self
            .db
            .get_chat_title(guild_id)
            .await?
            .unwrap_or_else(|| guild_id.to_string());
        let mut lines = vec![
            format!("Current settings for {}:", title),
            format!("- min_participation_count: {}", effective.min_participation_count),
            format!("- min_participation_ratio: {}", effective.min_participation_ratio),
            format!("- approval_ratio: {}", effective.approval_ratio),
            format!("- quorum_strategy: {}", effective.quorum_strategy),
            format!("- action_on_confirm: {}", effective.action_on_confirm),
            format!("- mute_duration_sec: {}", effective.mute_duration_sec),
            format!("- blacklist_enabled: {}", effective.blacklist_enabled),
            format!("- vote_timeout_sec: {}", effective.vote_timeout_sec),
            format!("- allow_vote_retract: {}", effective.allow_vote_retract),
            format!("- max_cases_per_user_hour: {}", effective.max_cases_per_user_hour),
        ];
        if let Some(overrides) = overrides {
            if !overrides.is_empty() {
                let keys: Vec<&str> = overrides.keys().map(|k| k.as_str()).collect();
                lines.push(format!("Overridden here: {}", keys.join(", ")));
            }
        }
        Ok(lines.join("\n"))
    }

    /// Parse and store one override. The merged result is validated through
    /// the settings resolver before anything is persisted.
    pub async fn update_setting(
        &self,
        guild_id: i64,
        field: &str,
        raw: &str,
    ) -> Result<String, AdminError> {
        let field = field.trim();
        let parsed = parse_override(field, raw)?;
        let mut overrides = self
            .db
            .get_chat_settings(guild_id)
            .await
            .map_err(AdminError::Internal)?
            .unwrap_or_default();
        overrides.insert(field.to_string(), parsed);
        settings::resolve(&self.defaults, Some(&overrides))?;
        self.db
            .set_chat_settings(guild_id, &overrides)
            .await
            .map_err(AdminError::Internal)?;
        Ok(format!("Updated {} = {}", field, raw.trim()))
    }

    pub async fn stats(&self, guild_id: i64) -> Result<String, anyhow::Error> {
        let cases = self.db.list_recent_cases(guild_id, STATS_CASE_COUNT).await?;
        if cases.is_empty() {
            return Ok("No cases on record for this server yet.".to_string());
        }
        let mut lines = vec![format!("Last {} case(s):", cases.len())];
        for case in cases {
            lines.push(format!(
                "- case #{}: {} (reported by {}, against {})",
                case.id, case.status, case.reporter_id, case.offender_id
            ));
        }
        Ok(lines.join("\n"))
    }

    pub async fn blacklist_action(
        &self,
        guild_id: i64,
        user_id: i64,
        action: &str,
        entry_reason: Option<&str>,
    ) -> Result<String, AdminError> {
        match action {
            "add" => {
                self.db
                    .blacklist_add(guild_id, user_id, entry_reason)
                    .await
                    .map_err(AdminError::Internal)?;
                Ok(format!("Added {} to the blacklist.", user_id))
            }
            "remove" => {
                self.db
                    .blacklist_remove(guild_id, user_id)
                    .await
                    .map_err(AdminError::Internal)?;
                Ok(format!("Removed {} from the blacklist.", user_id))
            }
            _ => Err(AdminError::BadInput(
                "the blacklist action must be add or remove".to_string(),
            )),
        }
    }
}

impl TypeMapKey for AdminService {
    type Value = Arc<AdminService>;
}

fn parse_override(field: &str, raw: &str) -> Result<Value, AdminError> {
    let raw = raw.trim();
    match field {
        "min_participation_ratio" | "approval_ratio" => raw
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| AdminError::BadInput(format!("`{}` is not a number", raw))),
        "min_participation_count" | "max_cases_per_user_hour" | "mute_duration_sec"
        | "vote_timeout_sec" => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| AdminError::BadInput(format!("`{}` is not a whole number", raw))),
        "blacklist_enabled" | "allow_vote_retract" => {
            bool_from_str(raw).map(Value::from).map_err(AdminError::BadInput)
        }
        "quorum_strategy" | "action_on_confirm" => Ok(Value::String(raw.to_string())),
        other => Err(AdminError::Settings(SettingsError::UnknownField(
            other.to_string(),
        ))),
    }
}

fn bool_from_str(raw: &str) -> Result<bool, String> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enable" => Ok(true),
        "0" | "false" | "no" | "off" | "disable" => Ok(false),
        _ => Err("expected true/false or yes/no".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::NaiveDateTime;
    use serenity::async_trait;

    use crate::transport::BallotRef;

    struct CountingTransport {
        admin_fetches: AtomicUsize,
        admins: Vec<i64>,
    }

    #[async_trait]
    impl ChatTransport for CountingTransport {
        async fn post_ballot(
            &self,
            _channel_id: i64,
            _reply_to: i64,
            _case_id: i32,
            _body: &str,
            _allow_retract: bool,
        ) -> Result<BallotRef, anyhow::Error> {
            unimplemented!("not used by admin tests")
        }

        async fn refresh_ballot(
            &self,
            _ballot: BallotRef,
            _case_id: i32,
            _body: &str,
            _allow_retract: bool,
        ) -> Result<(), anyhow::Error> {
            Ok(())
        }

        async fn close_ballot(&self, _ballot: BallotRef, _body: &str) -> Result<(), anyhow::Error> {
            Ok(())
        }

        async fn delete_message(
            &self,
            _channel_id: i64,
            _message_id: i64,
        ) -> Result<(), anyhow::Error> {
            Ok(())
        }

        async fn member_count(&self, _guild_id: i64) -> Result<u64, anyhow::Error> {
            Ok(10)
        }

        async fn admin_ids(&self, _guild_id: i64) -> Result<HashSet<i64>, anyhow::Error> {
            self.admin_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.admins.iter().copied().collect())
        }

        async fn ban_member(
            &self,
            _guild_id: i64,
            _user_id: i64,
            _reason: &str,
        ) -> Result<(), anyhow::Error> {
            Ok(())
        }

        async fn unban_member(&self, _guild_id: i64, _user_id: i64) -> Result<(), anyhow::Error> {
            Ok(())
        }

        async fn mute_member(
            &self,
            _guild_id: i64,
            _user_id: i64,
            _until: NaiveDateTime,
        ) -> Result<(), anyhow::Error> {
            Ok(())
        }
    }

    fn admin_service(admins: Vec<i64>, owners: Vec<i64>) -> (AdminService, Arc<CountingTransport>) {
        let transport = Arc::new(CountingTransport {
            admin_fetches: AtomicUsize::new(0),
            admins,
        });
        let service = AdminService::new(
            Arc::new(Database::connect_in_memory()),
            transport.clone(),
            ChatSettings::default(),
            owners,
        );
        (service, transport)
    }

    #[tokio::test]
    async fn admin_list_is_cached_between_checks() {
        let (service, transport) = admin_service(vec![11, 12], vec![]);
        assert!(service.ensure_admin(11, -5).await);
        assert!(!service.ensure_admin(99, -5).await);
        assert!(service.ensure_admin(12, -5).await);
        // three checks, one fetch
        assert_eq!(transport.admin_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn owners_bypass_the_admin_list() {
        let (service, transport) = admin_service(vec![], vec![42]);
        assert!(service.ensure_admin(42, -5).await);
        assert_eq!(transport.admin_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn update_setting_persists_and_validates() {
        let (service, _transport) = admin_service(vec![], vec![]);
        service
            .update_setting(-5, "approval_ratio", "0.8")
            .await
            .unwrap();
        let stored = service.db.get_chat_settings(-5).await.unwrap().unwrap();
        assert_eq!(stored.get("approval_ratio"), Some(&Value::from(0.8)));

        let err = service
            .update_setting(-5, "approval_ratio", "1.8")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdminError::Settings(SettingsError::OutOfRange { .. })
        ));
        // the failed update left the stored overrides untouched
        let stored = service.db.get_chat_settings(-5).await.unwrap().unwrap();
        assert_eq!(stored.get("approval_ratio"), Some(&Value::from(0.8)));

        let err = service
            .update_setting(-5, "no_such_field", "1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdminError::Settings(SettingsError::UnknownField(_))
        ));
    }

    #[tokio::test]
    async fn bool_parsing_accepts_the_usual_spellings() {
        let (service, _transport) = admin_service(vec![], vec![]);
        service
            .update_setting(-5, "allow_vote_retract", "off")
            .await
            .unwrap();
        let stored = service.db.get_chat_settings(-5).await.unwrap().unwrap();
        assert_eq!(stored.get("allow_vote_retract"), Some(&Value::from(false)));

        let err = service
            .update_setting(-5, "allow_vote_retract", "maybe")
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::BadInput(_)));
    }
}
