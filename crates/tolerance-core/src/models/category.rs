use serde::{Deserialize, Serialize};
use std::fmt;

/// Medication grouping used for reminder scoping and UI sectioning.
///
/// `key()` is the identity that appears in remote paths and notification ids;
/// `label()` is display text only and may change freely.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, uniffi::Enum,
)]
pub enum Category {
    #[serde(rename = "oit_dose")]
    OitDose,
    #[serde(rename = "antihistamine")]
    Antihistamine,
    #[serde(rename = "probiotic")]
    Probiotic,
    #[serde(rename = "vitamin")]
    Vitamin,
}

impl Category {
    /// Every category, in display order.
    pub const ALL: [Category; 4] = [
        Category::OitDose,
        Category::Antihistamine,
        Category::Probiotic,
        Category::Vitamin,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Category::OitDose => "oit_dose",
            Category::Antihistamine => "antihistamine",
            Category::Probiotic => "probiotic",
            Category::Vitamin => "vitamin",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::OitDose => "OIT Dose",
            Category::Antihistamine => "Antihistamine",
            Category::Probiotic => "Probiotic",
            Category::Vitamin => "Vitamin",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.key() == key)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
