pub mod engine;

use crate::domain::request::{RequestKind, ResidenceType};
use crate::roles::ReviewerRole;

pub use engine::{audit_transition, ApprovalEngine, TransitionOutcome};

/// Source of approval chains, indexed by request kind and residence.
pub trait ChainDefinition: Send + Sync {
    /// Ordered reviewer roles for a chained kind, `None` for kinds with their own lifecycle.
    fn chain_for(&self, kind: RequestKind, residence: ResidenceType) -> Option<Vec<ReviewerRole>>;
}

/// One row of the chain table. `residence: None` applies to every residence type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainEntry {
    pub kind: RequestKind,
    pub residence: Option<ResidenceType>,
    pub stages: Vec<ReviewerRole>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainTable {
    entries: Vec<ChainEntry>,
}

impl ChainTable {
    pub fn new(entries: Vec<ChainEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }
}

impl Default for ChainTable {
    fn default() -> Self {
        use ReviewerRole::{Advisor, Hod, Warden};

        let entry = |kind, residence, stages: &[ReviewerRole]| ChainEntry {
            kind,
            residence,
            stages: stages.to_vec(),
        };

        Self::new(vec![
            entry(RequestKind::Leave, None, &[Advisor]),
            entry(RequestKind::Bonafide, None, &[Advisor, Hod]),
            entry(RequestKind::Od, None, &[Advisor, Hod]),
            entry(RequestKind::Outpass, Some(ResidenceType::DayScholar), &[Advisor, Hod]),
            entry(RequestKind::Outpass, Some(ResidenceType::Hosteler), &[Advisor, Hod, Warden]),
        ])
    }
}

impl ChainDefinition for ChainTable {
    fn chain_for(&self, kind: RequestKind, residence: ResidenceType) -> Option<Vec<ReviewerRole>> {
        self.entries
            .iter()
            .filter(|entry| entry.kind == kind)
            .find(|entry| entry.residence.map_or(true, |required| required == residence))
            .map(|entry| entry.stages.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{ChainDefinition, ChainTable};
    use crate::domain::request::{RequestKind, ResidenceType};
    use crate::roles::ReviewerRole::{Advisor, Hod, Warden};

    #[test]
    fn outpass_chain_depends_on_residence() {
        let table = ChainTable::default();

        assert_eq!(
            table.chain_for(RequestKind::Outpass, ResidenceType::Hosteler),
            Some(vec![Advisor, Hod, Warden])
        );
        assert_eq!(
            table.chain_for(RequestKind::Outpass, ResidenceType::DayScholar),
            Some(vec![Advisor, Hod])
        );
    }

    #[test]
    fn residence_independent_kinds_share_one_chain() {
        let table = ChainTable::default();

        for residence in [ResidenceType::Hosteler, ResidenceType::DayScholar] {
            assert_eq!(table.chain_for(RequestKind::Leave, residence), Some(vec![Advisor]));
            assert_eq!(table.chain_for(RequestKind::Bonafide, residence), Some(vec![Advisor, Hod]));
            assert_eq!(table.chain_for(RequestKind::Od, residence), Some(vec![Advisor, Hod]));
        }
    }

    #[test]
    fn complaints_have_no_chain() {
        assert_eq!(ChainTable::default().chain_for(RequestKind::Complaint, ResidenceType::Hosteler), None);
    }
}
