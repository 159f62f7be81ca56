//! Event categories and frame classification.
//!
//! Upstream node feeds broadcast one text line per event. Field 0 is the
//! category tag; the position of the event identifier (when the tag carries
//! one) is fixed per tag and listed in a static table, never inferred.
//!
//! # Wire format
//!
//! ```text
//! tx <hash> <address> <value> ...        new transaction, hash at field 1
//! sn <milestone-index> <hash> ...        confirmed transaction, hash at field 2
//! lmi <previous-index> <new-index>       milestone advance, no identifier
//! ```

use std::fmt;

/// Number of recognized categories.
pub const CATEGORY_COUNT: usize = 3;

/// Event category, selected by the tag in field 0 of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// A newly broadcast transaction (`tx`).
    Transaction,
    /// A transaction confirmed by a milestone (`sn`).
    Confirmation,
    /// A milestone index advance (`lmi`).
    Milestone,
}

impl Category {
    /// The wire tag for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transaction => "tx",
            Self::Confirmation => "sn",
            Self::Milestone => "lmi",
        }
    }

    /// Parse a wire tag into a category.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "tx" => Some(Self::Transaction),
            "sn" => Some(Self::Confirmation),
            "lmi" => Some(Self::Milestone),
            _ => None,
        }
    }

    /// All categories, in wire-tag order.
    pub fn all() -> [Category; CATEGORY_COUNT] {
        [Self::Transaction, Self::Confirmation, Self::Milestone]
    }

    /// Dense index for per-category arrays, matching [`Category::all`] order.
    pub fn index(self) -> usize {
        match self {
            Self::Transaction => 0,
            Self::Confirmation => 1,
            Self::Milestone => 2,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field layout for one tag: which category it maps to and where the
/// event identifier sits, if the tag carries one.
#[derive(Debug, Clone, Copy)]
pub struct FrameLayout {
    pub category: Category,
    /// Whitespace-field index of the event identifier. `None` for tags
    /// that are pure counters.
    pub id_field: Option<usize>,
}

impl FrameLayout {
    /// Look up the layout for a tag. Unknown tags have no layout.
    pub fn for_tag(tag: &str) -> Option<FrameLayout> {
        let category = Category::from_tag(tag)?;
        let id_field = match category {
            Category::Transaction => Some(1),
            Category::Confirmation => Some(2),
            Category::Milestone => None,
        };
        Some(FrameLayout { category, id_field })
    }
}

/// A classified inbound frame: its category and the identifier carried in
/// the tag-specific field, borrowed from the frame text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified<'a> {
    pub category: Category,
    pub id: Option<&'a str>,
}

/// Classify a raw frame.
///
/// Splits on whitespace and dispatches on field 0. Returns `None` for an
/// unrecognized tag, and also for a recognized tag whose identifier field
/// is missing — both are dropped by callers, not treated as errors.
pub fn classify(frame: &str) -> Option<Classified<'_>> {
    let mut fields = frame.split_whitespace();
    let tag = fields.next()?;
    let layout = FrameLayout::for_tag(tag)?;

    let id = match layout.id_field {
        Some(index) => {
            // fields already consumed field 0
            Some(frame.split_whitespace().nth(index)?)
        }
        None => None,
    };

    Some(Classified {
        category: layout.category,
        id,
    })
}

/// The tag vocabulary, used to set transport subscription filters.
pub fn subscription_topics() -> [&'static str; CATEGORY_COUNT] {
    [
        Category::Transaction.as_str(),
        Category::Confirmation.as_str(),
        Category::Milestone.as_str(),
    ]
}
