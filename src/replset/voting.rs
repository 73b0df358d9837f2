/// Voting-parity correction
///
/// After any membership change the number of voting members must be odd and
/// within `[min_voting_members, max_voting_members]`. Promotion picks the
/// non-voting member with the lowest id, demotion the voting member with the
/// highest id, so the longest-lived members keep their votes.
use crate::config::MembershipConfig;
use crate::db::ReplsetConfig;
use crate::error::{WatchdogError, WatchdogResult};

/// Bounds on the number of voting members
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VotingLimits {
    pub min_voting_members: usize,
    pub max_voting_members: usize,
}

impl From<&MembershipConfig> for VotingLimits {
    fn from(config: &MembershipConfig) -> Self {
        Self {
            min_voting_members: config.min_voting_members,
            max_voting_members: config.max_voting_members,
        }
    }
}

impl VotingLimits {
    pub fn is_valid(&self, voting: usize) -> bool {
        voting % 2 == 1 && voting >= self.min_voting_members && voting <= self.max_voting_members
    }
}

/// A vote change applied to one member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VotingChange {
    Promoted { id: i32, host: String },
    Demoted { id: i32, host: String },
}

/// Index of the non-voting member with the lowest id that may be given a vote.
/// Hidden members (backups) and arbiters are never promoted.
pub fn promotion_candidate(config: &ReplsetConfig) -> Option<usize> {
    config
        .members
        .iter()
        .enumerate()
        .filter(|(_, m)| !m.is_voting() && !m.hidden && !m.arbiter_only)
        .min_by_key(|(_, m)| m.id)
        .map(|(i, _)| i)
}

/// Index of the voting member with the highest id
pub fn demotion_candidate(config: &ReplsetConfig) -> Option<usize> {
    config
        .members
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_voting())
        .max_by_key(|(_, m)| m.id)
        .map(|(i, _)| i)
}

/// Promote/demote members until the voting count is valid.
///
/// A member is promoted only while the count is even or below the floor and
/// still under the ceiling. Above the ceiling the highest-id voter is demoted
/// even when non-voting members exist, so an over-full set shrinks instead of
/// growing. Hidden members and arbiters are never promoted (see
/// [`promotion_candidate`]); with no other candidate an even count is fixed
/// by a demotion.
///
/// Returns the changes made, empty if the config already satisfied the limits.
pub fn correct_voting(
    config: &mut ReplsetConfig,
    limits: VotingLimits,
) -> WatchdogResult<Vec<VotingChange>> {
    let mut changes = Vec::new();
    let mut voting = config.voting_members();

    for _ in 0..=config.members.len() {
        if limits.is_valid(voting) {
            return Ok(changes);
        }

        let wants_vote = voting % 2 == 0 || voting < limits.min_voting_members;
        let promotable = voting < limits.max_voting_members;

        match promotion_candidate(config).filter(|_| wants_vote && promotable) {
            Some(index) => {
                let member = &mut config.members[index];
                member.promote();
                changes.push(VotingChange::Promoted {
                    id: member.id,
                    host: member.host.clone(),
                });
                voting += 1;
            }
            None if voting > limits.min_voting_members => {
                let Some(index) = demotion_candidate(config) else {
                    break;
                };
                let member = &mut config.members[index];
                member.demote();
                changes.push(VotingChange::Demoted {
                    id: member.id,
                    host: member.host.clone(),
                });
                voting -= 1;
            }
            None => break,
        }
    }

    if limits.is_valid(voting) {
        return Ok(changes);
    }
    Err(WatchdogError::invariant_violation(
        &config.name,
        format!(
            "voting correction did not converge: {} voting of {} members (limits {}..={})",
            voting,
            config.members.len(),
            limits.min_voting_members,
            limits.max_voting_members
        ),
    ))
}
