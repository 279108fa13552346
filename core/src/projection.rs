//! Read-side views derived from an event document.
//!
//! Everything here is a pure function of an [`Event`]: nothing is cached,
//! nothing is persisted, and nothing here affects the membership invariant,
//! which lives entirely in `User.events` and the `lead` keys of
//! `Event.participants`.
//!
//! # Flattened roster
//!
//! [`project`] turns registrations into one entry per person:
//!
//! ```text
//! participants: [ r1{lead: A, team: [m1, m2]}, r2{lead: B} ]
//!          ───► [ A, m1, m2, B ]
//! ```
//!
//! The lead is surfaced exactly once per registration. When a team member
//! carries the lead's email, that member's slot *is* the lead and no extra
//! entry is prepended. Missing member fields are replaced with the
//! placeholders from [`ProjectionPolicy`].

use crate::model::{Comment, Event, LeadSnapshot, Registration, TeamMember};
use serde::{Deserialize, Serialize};

/// Placeholders used when stored roster data is incomplete.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionPolicy {
    /// Shown for a member with no name
    pub placeholder_name: String,
    /// Shown for a member with no email
    pub placeholder_email: String,
    /// Profile image for members and for leads without one
    pub placeholder_image: String,
    /// Shown for a team registration with a blank team name
    pub placeholder_team_name: String,
}

impl Default for ProjectionPolicy {
    fn default() -> Self {
        Self {
            placeholder_name: "Participant".to_string(),
            placeholder_email: "N/A".to_string(),
            placeholder_image: "https://via.placeholder.com/150".to_string(),
            placeholder_team_name: "Unnamed Team".to_string(),
        }
    }
}

/// One display-ready person on an event roster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectedParticipant {
    /// Display name
    pub name: String,
    /// Contact email (or the placeholder)
    pub email: String,
    /// Profile image URL (or the placeholder)
    pub profile_image: String,
}

/// A registration grouped for the organiser dashboard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamView {
    /// Team name, `None` for solo registrations
    pub team_name: Option<String>,
    /// The registering lead
    pub lead: ProjectedParticipant,
    /// Team members other than the lead, in stored order
    pub members: Vec<ProjectedParticipant>,
}

/// Flatten an event's registrations into a roster of individuals.
#[must_use]
pub fn project(event: &Event, policy: &ProjectionPolicy) -> Vec<ProjectedParticipant> {
    let mut roster = Vec::with_capacity(event.participants.len());
    for registration in &event.participants {
        project_registration(registration, policy, &mut roster);
    }
    roster
}

/// Group an event's registrations per lead/team.
#[must_use]
pub fn project_teams(event: &Event, policy: &ProjectionPolicy) -> Vec<TeamView> {
    event
        .participants
        .iter()
        .map(|registration| {
            let lead = lead_entry(&registration.lead_snapshot, policy);
            let lead_email = normalized(&registration.lead_snapshot.email);
            let (team_name, members) = match &registration.team {
                Some(team) => {
                    let name = if team.team_name.trim().is_empty() {
                        policy.placeholder_team_name.clone()
                    } else {
                        team.team_name.clone()
                    };
                    let members = team
                        .members
                        .iter()
                        .filter(|m| !is_lead(m, &lead_email))
                        .map(|m| member_entry(m, policy))
                        .collect();
                    (Some(name), members)
                }
                None => (None, Vec::new()),
            };
            TeamView {
                team_name,
                lead,
                members,
            }
        })
        .collect()
}

/// Mean star rating, `None` when there are no ratings.
#[must_use]
pub fn average_rating(ratings: &[Comment]) -> Option<f64> {
    if ratings.is_empty() {
        return None;
    }
    let total: u32 = ratings.iter().map(|c| u32::from(c.rating.value())).sum();
    #[allow(clippy::cast_precision_loss)] // Rating counts never approach 2^52
    let count = ratings.len() as f64;
    Some(f64::from(total) / count)
}

fn project_registration(
    registration: &Registration,
    policy: &ProjectionPolicy,
    roster: &mut Vec<ProjectedParticipant>,
) {
    let lead = lead_entry(&registration.lead_snapshot, policy);
    let Some(team) = &registration.team else {
        roster.push(lead);
        return;
    };

    let lead_email = normalized(&registration.lead_snapshot.email);
    let positioned = team.members.iter().any(|m| is_lead(m, &lead_email));
    let mut lead_slot = Some(lead);

    if !positioned {
        roster.extend(lead_slot.take());
    }

    for member in &team.members {
        if is_lead(member, &lead_email) {
            // First matching slot stands for the lead; later repeats are dropped.
            roster.extend(lead_slot.take());
        } else {
            roster.push(member_entry(member, policy));
        }
    }
}

fn lead_entry(lead: &LeadSnapshot, policy: &ProjectionPolicy) -> ProjectedParticipant {
    ProjectedParticipant {
        name: lead.name.clone(),
        email: lead.email.clone(),
        profile_image: lead
            .profile_pic
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| policy.placeholder_image.clone()),
    }
}

fn member_entry(member: &TeamMember, policy: &ProjectionPolicy) -> ProjectedParticipant {
    ProjectedParticipant {
        name: non_blank(member.name.as_deref()).unwrap_or_else(|| policy.placeholder_name.clone()),
        email: non_blank(member.email.as_deref())
            .unwrap_or_else(|| policy.placeholder_email.clone()),
        profile_image: policy.placeholder_image.clone(),
    }
}

fn is_lead(member: &TeamMember, lead_email: &str) -> bool {
    !lead_email.is_empty()
        && member
            .email
            .as_deref()
            .is_some_and(|email| normalized(email) == lead_email)
}

fn normalized(email: &str) -> String {
    email.trim().to_lowercase()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}
