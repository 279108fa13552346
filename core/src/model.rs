//! Domain documents: users, events and the records embedded in events.
//!
//! `User.events` and `Event.participants` hold the two halves of the
//! membership fact. For every user `U` and event `E`:
//!
//! ```text
//! E ∈ U.events  ⇔  ∃ r ∈ Event(E).participants where r.lead == U.id
//! ```
//!
//! Only a `MembershipLedger` implementation may change either half.

use crate::error::RegistrationError;
use crate::ids::{CommentId, EventId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Money amount in cents (avoids floating point issues).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Creates a new `Money` amount from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Creates a `Money` amount from whole currency units
    #[must_use]
    pub const fn from_units(units: u64) -> Self {
        Self(units * 100)
    }

    /// Checks if this amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Whether an event accepts team registrations and how large a roster may be.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityPolicy {
    /// Registrations may carry a team roster.
    pub is_team_event: bool,
    /// Upper bound on `Team::members` when `is_team_event` is set.
    pub team_size: u32,
}

impl CapacityPolicy {
    /// Policy for an event that only takes individual registrations.
    #[must_use]
    pub const fn solo() -> Self {
        Self {
            is_team_event: false,
            team_size: 0,
        }
    }

    /// Policy for a team event with rosters of at most `team_size` members.
    #[must_use]
    pub const fn teams(team_size: u32) -> Self {
        Self {
            is_team_event: true,
            team_size,
        }
    }
}

/// Ticket pricing. Payment itself happens elsewhere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    /// Whether registration requires payment.
    pub is_paid: bool,
    /// Ticket price (zero for free events).
    pub amount: Money,
}

impl Pricing {
    /// A free event.
    #[must_use]
    pub const fn free() -> Self {
        Self {
            is_paid: false,
            amount: Money::from_cents(0),
        }
    }

    /// A paid event.
    #[must_use]
    pub const fn paid(amount: Money) -> Self {
        Self {
            is_paid: true,
            amount,
        }
    }
}

/// A user document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable identity
    pub id: UserId,
    /// Events this user is registered for (authoritative membership set)
    pub events: BTreeSet<EventId>,
    /// Profile picture URL, snapshotted into registrations
    pub profile_image: Option<String>,
}

impl User {
    /// Creates a user with no registrations.
    #[must_use]
    pub const fn new(id: UserId, profile_image: Option<String>) -> Self {
        Self {
            id,
            events: BTreeSet::new(),
            profile_image,
        }
    }

    /// Whether `event_id` is in this user's membership set.
    #[must_use]
    pub fn is_registered_for(&self, event_id: &EventId) -> bool {
        self.events.contains(event_id)
    }
}

/// Lead contact details captured when the registration was made.
///
/// Decoupled from the live user document so later profile edits do not
/// rewrite historical rosters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadSnapshot {
    /// Lead name
    pub name: String,
    /// Lead email
    pub email: String,
    /// Lead phone
    pub phone: String,
    /// Profile picture at registration time
    pub profile_pic: Option<String>,
}

/// A team member as submitted. Either field may be missing in stored data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    /// Member name
    pub name: Option<String>,
    /// Member email
    pub email: Option<String>,
}

impl TeamMember {
    /// Creates a fully specified member.
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: Some(email.into()),
        }
    }

    /// Whether neither a name nor an email was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        is_blank(self.name.as_deref()) && is_blank(self.email.as_deref())
    }
}

/// A team roster attached to a registration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Team name
    pub team_name: String,
    /// Members in submission order
    pub members: Vec<TeamMember>,
}

/// One participant (or team) enrolled in an event, keyed by `lead`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// The registering user; unique within an event's participants
    pub lead: UserId,
    /// Lead contact details at registration time
    pub lead_snapshot: LeadSnapshot,
    /// Team roster, present only for opted-in team registrations
    pub team: Option<Team>,
    /// When the registration was committed
    pub registered_at: DateTime<Utc>,
}

/// A star rating in `[1, 5]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    /// Lowest accepted rating.
    pub const MIN: u8 = 1;
    /// Highest accepted rating.
    pub const MAX: u8 = 5;

    /// Validates a raw rating.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` when `value` is outside `[1, 5]`.
    pub fn new(value: u8) -> Result<Self, RegistrationError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(RegistrationError::ValidationFailed(format!(
                "Rating must be between {} and {}, got {value}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    /// The numeric rating.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = RegistrationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

/// A review embedded in an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment identity
    pub id: CommentId,
    /// Only this user may delete the comment
    pub author: UserId,
    /// Name shown next to the comment
    pub display_name: String,
    /// Star rating
    pub rating: Rating,
    /// Comment body
    pub text: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// An event document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Stable identity
    pub id: EventId,
    /// Display title
    pub title: String,
    /// Team rules
    pub capacity: CapacityPolicy,
    /// Ticket pricing
    pub pricing: Pricing,
    /// Registrations in registration order
    pub participants: Vec<Registration>,
    /// Reviews in creation order
    pub ratings: Vec<Comment>,
}

impl Event {
    /// Creates an event with no participants or ratings.
    #[must_use]
    pub fn new(id: EventId, title: impl Into<String>, capacity: CapacityPolicy, pricing: Pricing) -> Self {
        Self {
            id,
            title: title.into(),
            capacity,
            pricing,
            participants: Vec::new(),
            ratings: Vec::new(),
        }
    }

    /// The registration led by `lead`, if any.
    #[must_use]
    pub fn participant(&self, lead: &UserId) -> Option<&Registration> {
        self.participants.iter().find(|r| &r.lead == lead)
    }

    /// Whether `lead` holds a registration for this event.
    #[must_use]
    pub fn has_participant(&self, lead: &UserId) -> bool {
        self.participant(lead).is_some()
    }

    /// The comment with `id`, if any.
    #[must_use]
    pub fn comment(&self, id: &CommentId) -> Option<&Comment> {
        self.ratings.iter().find(|c| &c.id == id)
    }
}

/// Lead details supplied with a registration request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadInfo {
    /// Lead name
    pub name: String,
    /// Lead email
    pub email: String,
    /// Lead phone
    pub phone: String,
}

impl LeadInfo {
    /// Creates lead details.
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            phone: phone.into(),
        }
    }

    /// Checks that name, email and phone are all present.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` naming the first blank field.
    pub fn validate(&self) -> Result<(), RegistrationError> {
        for (field, value) in [("name", &self.name), ("email", &self.email), ("phone", &self.phone)] {
            if value.trim().is_empty() {
                return Err(RegistrationError::ValidationFailed(format!(
                    "Missing lead {field}"
                )));
            }
        }
        Ok(())
    }

    /// Snapshot for embedding in a registration.
    #[must_use]
    pub fn snapshot(&self, profile_pic: Option<String>) -> LeadSnapshot {
        LeadSnapshot {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: self.phone.trim().to_string(),
            profile_pic,
        }
    }
}

/// Team details supplied with a registration request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamInfo {
    /// Team name
    pub team_name: String,
    /// Submitted members; entries with neither name nor email are dropped
    pub members: Vec<TeamMember>,
}

impl TeamInfo {
    /// Creates team details.
    #[must_use]
    pub fn new(team_name: impl Into<String>, members: Vec<TeamMember>) -> Self {
        Self {
            team_name: team_name.into(),
            members,
        }
    }

    /// Validates against the event's capacity policy and builds the roster.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` if the event is not a team event, the team
    /// name is blank, or the roster exceeds `team_size`.
    pub fn into_team(self, policy: CapacityPolicy) -> Result<Team, RegistrationError> {
        if !policy.is_team_event {
            return Err(RegistrationError::ValidationFailed(
                "Event does not accept team registrations".to_string(),
            ));
        }
        if self.team_name.trim().is_empty() {
            return Err(RegistrationError::ValidationFailed(
                "Missing team name".to_string(),
            ));
        }

        let members: Vec<TeamMember> = self
            .members
            .into_iter()
            .filter(|m| !m.is_empty())
            .collect();

        if members.len() > policy.team_size as usize {
            return Err(RegistrationError::ValidationFailed(format!(
                "Team has {} members, limit is {}",
                members.len(),
                policy.team_size
            )));
        }

        Ok(Team {
            team_name: self.team_name.trim().to_string(),
            members,
        })
    }
}

pub(crate) fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}
