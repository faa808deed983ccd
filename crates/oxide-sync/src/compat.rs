//! Add-column safety analysis.
//!
//! SQLite can only append columns in place, and only when the new column
//! has no PRIMARY KEY, UNIQUE or REFERENCES clause, no non-constant default,
//! and is either nullable or NOT NULL with a non-NULL default. Appended
//! columns with a COLLATE, CHECK or GENERATED clause are rebuilt as well.
//! Everything else is a rebuild.
//!
//! Column names compare ASCII case-insensitively, as SQLite does.

use std::fmt;

use serde::Serialize;

use crate::constraints::{CreateTableDefinition, DefaultKind};
use crate::schema::ColumnDescriptor;

/// Why a table has to be rebuilt rather than altered in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RebuildReason {
    /// The reference has fewer columns than the target.
    ColumnsRemoved {
        /// Target column count.
        target: usize,
        /// Reference column count.
        reference: usize,
    },
    /// Existing columns were renamed or reordered.
    PrefixMismatch {
        /// First position where the names differ.
        position: usize,
        /// Target column name at that position.
        target: String,
        /// Reference column name at that position.
        reference: String,
    },
    /// An existing column became generated, or stopped being generated.
    GenerationChanged {
        /// The column.
        column: String,
    },
    /// A new column is part of the primary key.
    PrimaryKey {
        /// The new column.
        column: String,
    },
    /// A new column is NOT NULL with no usable default.
    NotNullWithoutDefault {
        /// The new column.
        column: String,
    },
    /// A new column's default is evaluated per row.
    NonConstantDefault {
        /// The new column.
        column: String,
    },
    /// A new column carries a constraint ADD COLUMN cannot express.
    Constraint {
        /// The new column.
        column: String,
        /// The offending constraint keyword.
        constraint: &'static str,
    },
    /// The reference definition could not be read with confidence.
    Unclassifiable {
        /// The new column being examined, if the failure is column specific.
        column: Option<String>,
        /// What went wrong.
        detail: String,
    },
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColumnsRemoved { target, reference } => write!(
                f,
                "reference has {reference} columns, target has {target}"
            ),
            Self::PrefixMismatch {
                position,
                target,
                reference,
            } => write!(
                f,
                "column {position} is '{target}' in target but '{reference}' in reference"
            ),
            Self::GenerationChanged { column } => {
                write!(f, "column '{column}' changed between stored and generated")
            }
            Self::PrimaryKey { column } => write!(f, "new column '{column}' is part of the primary key"),
            Self::NotNullWithoutDefault { column } => {
                write!(f, "new column '{column}' is NOT NULL without a default")
            }
            Self::NonConstantDefault { column } => {
                write!(f, "new column '{column}' has a non-constant default")
            }
            Self::Constraint { column, constraint } => {
                write!(f, "new column '{column}' has a {constraint} constraint")
            }
            Self::Unclassifiable {
                column: Some(column),
                detail,
            } => write!(f, "cannot classify new column '{column}': {detail}"),
            Self::Unclassifiable {
                column: None,
                detail,
            } => write!(f, "cannot classify reference definition: {detail}"),
        }
    }
}

/// Verdict for one table present in both databases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    /// Differences are pure appension; `new_columns` may be zero.
    AddOnly {
        /// Number of appended columns.
        new_columns: usize,
    },
    /// The table must be recreated with a data copy.
    Rebuild(RebuildReason),
}

impl Compatibility {
    /// Returns true for [`Compatibility::AddOnly`].
    #[must_use]
    pub fn is_add_only(&self) -> bool {
        matches!(self, Self::AddOnly { .. })
    }
}

/// Decides whether `reference` can be reached from `target` by appending
/// columns only.
///
/// `reference_create` is the reference's CREATE TABLE statement; it is only
/// parsed when there are new columns to examine.
#[must_use]
pub fn assess(
    target: &[ColumnDescriptor],
    reference: &[ColumnDescriptor],
    reference_create: &str,
) -> Compatibility {
    if reference.len() < target.len() {
        return Compatibility::Rebuild(RebuildReason::ColumnsRemoved {
            target: target.len(),
            reference: reference.len(),
        });
    }

    if let Some((position, (t, r))) = target
        .iter()
        .zip(reference)
        .enumerate()
        .find(|(_, (t, r))| !t.name.eq_ignore_ascii_case(&r.name))
    {
        return Compatibility::Rebuild(RebuildReason::PrefixMismatch {
            position,
            target: t.name.clone(),
            reference: r.name.clone(),
        });
    }

    if let Some((t, _)) = target
        .iter()
        .zip(reference)
        .find(|(t, r)| t.generated != r.generated)
    {
        return Compatibility::Rebuild(RebuildReason::GenerationChanged {
            column: t.name.clone(),
        });
    }

    let appended = &reference[target.len()..];
    if appended.is_empty() {
        return Compatibility::AddOnly { new_columns: 0 };
    }

    let definition = match CreateTableDefinition::parse(reference_create) {
        Ok(definition) => definition,
        Err(e) => {
            return Compatibility::Rebuild(RebuildReason::Unclassifiable {
                column: None,
                detail: e.to_string(),
            });
        }
    };

    for column in appended {
        if let Err(reason) = check_appended(column, &definition) {
            return Compatibility::Rebuild(reason);
        }
    }

    Compatibility::AddOnly {
        new_columns: appended.len(),
    }
}

/// Boolean form of [`assess`].
#[must_use]
pub fn is_add_only_safe(
    target: &[ColumnDescriptor],
    reference: &[ColumnDescriptor],
    reference_create: &str,
) -> bool {
    assess(target, reference, reference_create).is_add_only()
}

fn check_appended(
    column: &ColumnDescriptor,
    definition: &CreateTableDefinition,
) -> Result<(), RebuildReason> {
    let name = || column.name.clone();

    if column.is_primary_key() {
        return Err(RebuildReason::PrimaryKey { column: name() });
    }
    if column.generated {
        return Err(RebuildReason::Constraint {
            column: name(),
            constraint: "GENERATED",
        });
    }

    let default = column.default_literal();
    let default_is_null = default.is_some_and(|d| d.trim().eq_ignore_ascii_case("NULL"));
    if column.not_null && (default.is_none() || default_is_null) {
        return Err(RebuildReason::NotNullWithoutDefault { column: name() });
    }

    let Some(parsed) = definition.column(&column.name) else {
        return Err(RebuildReason::Unclassifiable {
            column: Some(name()),
            detail: "no matching column definition".to_string(),
        });
    };

    let inline = [
        (parsed.primary_key, "PRIMARY KEY"),
        (parsed.unique, "UNIQUE"),
        (parsed.references, "REFERENCES"),
        (parsed.generated, "GENERATED"),
        (parsed.collate, "COLLATE"),
        (parsed.check, "CHECK"),
    ];
    if let Some((_, constraint)) = inline.into_iter().find(|(present, _)| *present) {
        return Err(RebuildReason::Constraint {
            column: name(),
            constraint,
        });
    }

    if let Some(constraint) = definition.constraints_on(&column.name).next() {
        return Err(RebuildReason::Constraint {
            column: name(),
            constraint: constraint.kind.keyword(),
        });
    }

    match parsed.default {
        Some(DefaultKind::Expression) => Err(RebuildReason::NonConstantDefault { column: name() }),
        Some(DefaultKind::Null) if column.not_null => {
            Err(RebuildReason::NotNullWithoutDefault { column: name() })
        }
        None if default.is_some() => Err(RebuildReason::Unclassifiable {
            column: Some(name()),
            detail: "default reported by the engine but not found in the definition".to_string(),
        }),
        _ => Ok(()),
    }
}
