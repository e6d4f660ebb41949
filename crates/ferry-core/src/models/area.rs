use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Remote location an entry is moved to once discovery has decided its fate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Area {
    /// Non-canonical copies of an entry already seen in the same listing.
    Duplicates,
    /// Structured documents, out of pipeline scope.
    Documents,
    /// Registered in the ledger and queued for transfer.
    Download,
}

impl Display for Area {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Area::Duplicates => write!(f, "duplicates"),
            Area::Documents => write!(f, "documents"),
            Area::Download => write!(f, "download"),
        }
    }
}
