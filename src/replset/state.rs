/// Cached replica set config/status and the membership mutations applied to it
use super::voting::{correct_voting, VotingChange, VotingLimits};
use super::Mongod;
use crate::config::MembershipConfig;
use crate::db::{ConfigMember, ReplsetConfig, ReplsetStatus, Session};
use crate::error::{WatchdogError, WatchdogResult};
use crate::metrics;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Member tag marking dedicated backup members
pub const BACKUP_TAG: &str = "backup";

#[derive(Debug, Default)]
struct StateInner {
    config: Option<ReplsetConfig>,
    status: Option<ReplsetStatus>,
    /// The cached config holds changes not yet written to the replica set.
    /// Cleared whenever the config is reloaded, since the reload drops them.
    do_update: bool,
}

/// Config and status snapshots of one replica set
#[derive(Debug)]
pub struct State {
    replset: String,
    membership: MembershipConfig,
    inner: Mutex<StateInner>,
}

impl State {
    pub fn new(replset: &str, membership: MembershipConfig) -> Self {
        Self {
            replset: replset.to_string(),
            membership,
            inner: Mutex::new(StateInner::default()),
        }
    }

    pub fn replset(&self) -> &str {
        &self.replset
    }

    /// Reload config, then status. Neither snapshot changes unless both loads succeed.
    pub async fn fetch(&self, session: &dyn Session) -> WatchdogResult<()> {
        let mut inner = self.inner.lock().await;
        debug!(replset = %self.replset, "Updating replset config and status");

        let config = session.replset_config().await?;
        let status = session.replset_status().await?;
        inner.config = Some(config);
        inner.status = Some(status);
        inner.do_update = false;
        Ok(())
    }

    async fn fetch_config(&self, session: &dyn Session, inner: &mut StateInner) -> WatchdogResult<()> {
        inner.config = Some(session.replset_config().await?);
        if inner.do_update {
            debug!(replset = %self.replset, "Discarding unwritten config changes");
            inner.do_update = false;
        }
        Ok(())
    }

    pub async fn get_config(&self) -> Option<ReplsetConfig> {
        self.inner.lock().await.config.clone()
    }

    pub async fn get_status(&self) -> Option<ReplsetStatus> {
        self.inner.lock().await.status.clone()
    }

    /// Whether the cached config holds unwritten changes
    pub async fn is_pending(&self) -> bool {
        self.inner.lock().await.do_update
    }

    /// Add mongods to the replica set config and write it if anything changed.
    ///
    /// Returns whether a new config was written.
    pub async fn add_config_members(
        &self,
        session: &dyn Session,
        mongods: &[Mongod],
    ) -> WatchdogResult<bool> {
        if mongods.is_empty() {
            return Ok(false);
        }

        let mut inner = self.inner.lock().await;
        self.fetch_config(session, &mut inner).await?;

        let mut changed = false;
        if let Some(config) = inner.config.as_mut() {
            for mongod in mongods {
                let host = mongod.name();
                if config.has_member(&host) {
                    continue;
                }

                let id = match config.next_member_id() {
                    Some(id) if config.members.len() < self.membership.max_members => id,
                    _ => {
                        let error = WatchdogError::CapacityExceeded {
                            replset: self.replset.clone(),
                            host,
                            max_members: self.membership.max_members,
                        };
                        warn!(replset = %self.replset, error = %error, "Dropping remaining new members");
                        break;
                    }
                };

                let member = self.new_member(config, id, mongod);
                info!(
                    replset = %self.replset,
                    host = %member.host,
                    id = member.id,
                    votes = member.votes,
                    hidden = member.hidden,
                    "Adding member to replset config"
                );
                config.add_member(member);
                changed = true;
            }
        }

        self.finish_update(session, &mut inner, changed).await
    }

    /// Remove members from the replica set config and write it if anything changed.
    ///
    /// Returns whether a new config was written.
    pub async fn remove_config_members(
        &self,
        session: &dyn Session,
        members: &[ConfigMember],
    ) -> WatchdogResult<bool> {
        if members.is_empty() {
            return Ok(false);
        }

        let mut inner = self.inner.lock().await;
        self.fetch_config(session, &mut inner).await?;

        let mut changed = false;
        if let Some(config) = inner.config.as_mut() {
            for member in members {
                if let Some(removed) = config.remove_member(&member.host) {
                    info!(
                        replset = %self.replset,
                        host = %removed.host,
                        id = removed.id,
                        "Removing member from replset config"
                    );
                    changed = true;
                }
            }
        }

        self.finish_update(session, &mut inner, changed).await
    }

    fn new_member(&self, config: &ReplsetConfig, id: i32, mongod: &Mongod) -> ConfigMember {
        let mut member = ConfigMember::new(id, &mongod.name());
        member.tags.insert(
            self.membership.framework_tag.clone(),
            mongod.framework_name.clone(),
        );

        if mongod.is_backup_node() {
            member.demote();
            member.hidden = true;
            member.tags.insert(BACKUP_TAG.to_string(), "true".to_string());
        } else if config.voting_members() >= self.membership.max_voting_members {
            member.demote();
        }
        member
    }

    async fn finish_update(
        &self,
        session: &dyn Session,
        inner: &mut StateInner,
        changed: bool,
    ) -> WatchdogResult<bool> {
        if changed {
            inner.do_update = true;
        }

        if let Some(config) = inner.config.as_mut() {
            if inner.do_update {
                let changes = correct_voting(config, VotingLimits::from(&self.membership))?;
                if !changes.is_empty() {
                    self.log_voting_changes(&changes);
                    inner.do_update = true;
                }
            }
        }

        self.persist(session, inner).await
    }

    fn log_voting_changes(&self, changes: &[VotingChange]) {
        for change in changes {
            match change {
                VotingChange::Promoted { id, host } => {
                    info!(replset = %self.replset, host = %host, id = id, "Promoted member to voting")
                }
                VotingChange::Demoted { id, host } => {
                    info!(replset = %self.replset, host = %host, id = id, "Demoted member to non-voting")
                }
            }
        }
    }

    /// Write the cached config if it holds changes. The version is bumped once per write.
    async fn persist(&self, session: &dyn Session, inner: &mut StateInner) -> WatchdogResult<bool> {
        if !inner.do_update {
            return Ok(false);
        }
        let Some(config) = inner.config.as_mut() else {
            return Ok(false);
        };

        config.increment_version();
        info!(
            replset = %self.replset,
            config_version = config.version,
            members = config.members.len(),
            voting = config.voting_members(),
            "Writing new replset config"
        );

        session.save_replset_config(config).await?;
        inner.do_update = false;
        metrics::record_config_write(&self.replset);
        Ok(true)
    }
}
