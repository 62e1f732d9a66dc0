//! Authorization guards for ShelfSwap.
//!
//! Roles are never inferred ad hoc by comparing ids at call sites. Callers
//! resolve the acting user's [`Party`] once, turn it into a
//! [`CapabilitySet`], and check the capability a command needs.

use serde::Serialize;
use thiserror::Error;

/// The role an acting user plays in a two-party arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Requester,
    Owner,
}

impl Party {
    /// Resolve `actor` against the two parties of a request.
    pub fn resolve(actor: &str, requester_id: &str, owner_id: &str) -> Option<Self> {
        if actor == requester_id {
            Some(Self::Requester)
        } else if actor == owner_id {
            Some(Self::Owner)
        } else {
            None
        }
    }

    /// The other side of the arrangement.
    pub fn counterpart(self) -> Self {
        match self {
            Self::Requester => Self::Owner,
            Self::Owner => Self::Requester,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::Owner => "owner",
        }
    }
}

/// Actions a party may be entitled to on a swap request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Capability {
    /// Accept an original (PENDING) request.
    AcceptRequest = 1 << 0,
    /// Substitute a different book for the one offered.
    CounterOffer = 1 << 1,
    /// Accept a counter-offer made by the other side.
    AcceptCounterOffer = 1 << 2,
    /// Withdraw from a not-yet-accepted request.
    Cancel = 1 << 3,
    /// Confirm one's own side of the physical exchange.
    Complete = 1 << 4,
    /// Read the request and its joined views.
    View = 1 << 5,
}

/// Small bitset of [`Capability`] values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0 |= capability as u8;
        self
    }

    pub fn contains(self, capability: Capability) -> bool {
        self.0 & capability as u8 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Role grants, independent of the request's current status.
    pub fn for_party(party: Option<Party>) -> Self {
        let base = Self::empty();
        match party {
            None => base,
            Some(Party::Owner) => base
                .with(Capability::View)
                .with(Capability::AcceptRequest)
                .with(Capability::CounterOffer)
                .with(Capability::Cancel)
                .with(Capability::Complete),
            Some(Party::Requester) => base
                .with(Capability::View)
                .with(Capability::AcceptCounterOffer)
                .with(Capability::Cancel)
                .with(Capability::Complete),
        }
    }
}

/// Denial raised by the guards in this crate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Denied {
    /// The actor is not a party at all.
    #[error("actor is not a party to this resource")]
    NotAParty,
    /// The actor is a party but lacks the capability.
    #[error("{party} may not {action}")]
    MissingCapability { party: &'static str, action: &'static str },
}

/// Require `capability`, naming `action` in the denial.
pub fn require(
    party: Option<Party>,
    capability: Capability,
    action: &'static str,
) -> Result<(), Denied> {
    let Some(party) = party else {
        tracing::debug!(action, "authorization denied: not a party");
        return Err(Denied::NotAParty);
    };

    if CapabilitySet::for_party(Some(party)).contains(capability) {
        Ok(())
    } else {
        tracing::debug!(party = party.as_str(), action, "authorization denied");
        Err(Denied::MissingCapability {
            party: party.as_str(),
            action,
        })
    }
}

/// Guard for single-owner resources such as books.
pub fn require_owner(actor: &str, owner_id: &str) -> Result<(), Denied> {
    if actor == owner_id {
        Ok(())
    } else {
        Err(Denied::NotAParty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_parties() {
        assert_eq!(Party::resolve("a", "a", "b"), Some(Party::Requester));
        assert_eq!(Party::resolve("b", "a", "b"), Some(Party::Owner));
        assert_eq!(Party::resolve("c", "a", "b"), None);
        assert_eq!(Party::Owner.counterpart(), Party::Requester);
    }

    #[test]
    fn owner_and_requester_grants_differ() {
        let owner = CapabilitySet::for_party(Some(Party::Owner));
        let requester = CapabilitySet::for_party(Some(Party::Requester));

        assert!(owner.contains(Capability::AcceptRequest));
        assert!(owner.contains(Capability::CounterOffer));
        assert!(!owner.contains(Capability::AcceptCounterOffer));

        assert!(requester.contains(Capability::AcceptCounterOffer));
        assert!(!requester.contains(Capability::AcceptRequest));
        assert!(!requester.contains(Capability::CounterOffer));

        assert!(CapabilitySet::for_party(None).is_empty());
    }

    #[test]
    fn require_reports_the_reason() {
        assert_eq!(
            require(None, Capability::Cancel, "cancel"),
            Err(Denied::NotAParty)
        );
        assert_eq!(
            require(Some(Party::Requester), Capability::CounterOffer, "counter-offer"),
            Err(Denied::MissingCapability {
                party: "requester",
                action: "counter-offer"
            })
        );
        assert!(require(Some(Party::Owner), Capability::CounterOffer, "counter-offer").is_ok());
    }

    #[test]
    fn owner_guard() {
        assert!(require_owner("u1", "u1").is_ok());
        assert_eq!(require_owner("u2", "u1"), Err(Denied::NotAParty));
    }
}
