//! Query-algebra operators: the input language of the binder.
//!
//! Selector and predicate arguments are [`ExprKind::Lambda`](super::ExprKind)
//! nodes whose parameters stand for the current row.

use serde::{Deserialize, Serialize};

use super::expr::ExprRef;
use crate::error::{QueryError, Result};

/// Terminal operators returning one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Last,
    LastOrDefault,
}

impl ElementKind {
    /// Returns true for the `*OrDefault` forms.
    #[must_use]
    pub const fn or_default(self) -> bool {
        matches!(
            self,
            Self::FirstOrDefault | Self::SingleOrDefault | Self::LastOrDefault
        )
    }

    /// Returns true for `Last` and `LastOrDefault`.
    #[must_use]
    pub const fn is_last(self) -> bool {
        matches!(self, Self::Last | Self::LastOrDefault)
    }

    /// Returns true for `Single` and `SingleOrDefault`.
    #[must_use]
    pub const fn is_single(self) -> bool {
        matches!(self, Self::Single | Self::SingleOrDefault)
    }
}

/// Numeric aggregate operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateOp {
    Count,
    Sum,
    Min,
    Max,
    Average,
}

/// Set combinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOpKind {
    /// Distinct union.
    Union,
    /// Union keeping duplicates.
    Concat,
    /// Rows in both.
    Intersect,
    /// Rows in the left only.
    Except,
}

impl SetOpKind {
    /// SQL keyword(s).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Union => "UNION",
            Self::Concat => "UNION ALL",
            Self::Intersect => "INTERSECT",
            Self::Except => "EXCEPT",
        }
    }
}

/// One algebra operator application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueryOp {
    /// All instances of a mapped entity.
    Source {
        /// Entity name.
        entity: String,
    },
    /// Filter.
    Where {
        /// Input sequence.
        source: ExprRef,
        /// `row => bool`.
        predicate: ExprRef,
    },
    /// Projection.
    Select {
        /// Input sequence.
        source: ExprRef,
        /// `row => value`.
        selector: ExprRef,
    },
    /// Flattening projection.
    SelectMany {
        /// Input sequence.
        source: ExprRef,
        /// `row => sequence`.
        collection: ExprRef,
        /// `(row, inner) => value`, identity on `inner` when absent.
        result: Option<ExprRef>,
    },
    /// Equi-join.
    Join {
        /// Outer sequence.
        outer: ExprRef,
        /// Inner sequence.
        inner: ExprRef,
        /// `outer => key`.
        outer_key: ExprRef,
        /// `inner => key`.
        inner_key: ExprRef,
        /// `(outer, inner) => value`.
        result: ExprRef,
    },
    /// Join producing, per outer row, the sequence of matching inner rows.
    GroupJoin {
        /// Outer sequence.
        outer: ExprRef,
        /// Inner sequence.
        inner: ExprRef,
        /// `outer => key`.
        outer_key: ExprRef,
        /// `inner => key`.
        inner_key: ExprRef,
        /// `(outer, inners) => value`.
        result: ExprRef,
    },
    /// Ordering; `then` appends to a previous ordering.
    OrderBy {
        /// Input sequence.
        source: ExprRef,
        /// `row => key`.
        key: ExprRef,
        /// Descending order.
        descending: bool,
        /// `ThenBy` rather than `OrderBy`.
        then: bool,
    },
    /// Grouping.
    GroupBy {
        /// Input sequence.
        source: ExprRef,
        /// `row => key`.
        key: ExprRef,
        /// `row => element`, the row itself when absent.
        element: Option<ExprRef>,
        /// `(key, elements) => value`, the grouping itself when absent.
        result: Option<ExprRef>,
    },
    /// Duplicate elimination.
    Distinct {
        /// Input sequence.
        source: ExprRef,
    },
    /// Reversed order.
    Reverse {
        /// Input sequence.
        source: ExprRef,
    },
    /// Skip rows.
    Skip {
        /// Input sequence.
        source: ExprRef,
        /// Row count.
        count: ExprRef,
    },
    /// Take rows.
    Take {
        /// Input sequence.
        source: ExprRef,
        /// Row count.
        count: ExprRef,
    },
    /// Single element.
    Element {
        /// Input sequence.
        source: ExprRef,
        /// Which element.
        kind: ElementKind,
        /// Optional filter applied first.
        predicate: Option<ExprRef>,
    },
    /// Numeric aggregate.
    Aggregate {
        /// Input sequence.
        source: ExprRef,
        /// Function.
        op: AggregateOp,
        /// `row => value`, the row itself when absent.
        selector: Option<ExprRef>,
    },
    /// Does any (matching) row exist.
    Any {
        /// Input sequence.
        source: ExprRef,
        /// Optional filter.
        predicate: Option<ExprRef>,
    },
    /// Do all rows match.
    All {
        /// Input sequence.
        source: ExprRef,
        /// Predicate.
        predicate: ExprRef,
    },
    /// Is `item` in the sequence.
    Contains {
        /// Input sequence.
        source: ExprRef,
        /// Searched value.
        item: ExprRef,
    },
    /// Set combination.
    SetOp {
        /// Combinator.
        kind: SetOpKind,
        /// Left sequence.
        left: ExprRef,
        /// Right sequence.
        right: ExprRef,
    },
    /// A single default row when the sequence is empty.
    DefaultIfEmpty {
        /// Input sequence.
        source: ExprRef,
    },
}

impl QueryOp {
    /// Operator name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Source { .. } => "Source",
            Self::Where { .. } => "Where",
            Self::Select { .. } => "SelectOp",
            Self::SelectMany { .. } => "SelectMany",
            Self::Join { .. } => "JoinOp",
            Self::GroupJoin { .. } => "GroupJoin",
            Self::OrderBy { .. } => "OrderBy",
            Self::GroupBy { .. } => "GroupBy",
            Self::Distinct { .. } => "Distinct",
            Self::Reverse { .. } => "Reverse",
            Self::Skip { .. } => "Skip",
            Self::Take { .. } => "Take",
            Self::Element { .. } => "Element",
            Self::Aggregate { .. } => "AggregateOp",
            Self::Any { .. } => "Any",
            Self::All { .. } => "All",
            Self::Contains { .. } => "Contains",
            Self::SetOp { .. } => "SetOp",
            Self::DefaultIfEmpty { .. } => "DefaultIfEmpty",
        }
    }

    /// Child expressions in a fixed order.
    #[must_use]
    pub fn children(&self) -> Vec<&ExprRef> {
        match self {
            Self::Source { .. } => Vec::new(),
            Self::Where { source, predicate } => vec![source, predicate],
            Self::Select { source, selector } => vec![source, selector],
            Self::SelectMany {
                source,
                collection,
                result,
            } => {
                let mut v = vec![source, collection];
                v.extend(result);
                v
            }
            Self::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            }
            | Self::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => vec![outer, inner, outer_key, inner_key, result],
            Self::OrderBy { source, key, .. } => vec![source, key],
            Self::GroupBy {
                source,
                key,
                element,
                result,
            } => {
                let mut v = vec![source, key];
                v.extend(element);
                v.extend(result);
                v
            }
            Self::Distinct { source }
            | Self::Reverse { source }
            | Self::DefaultIfEmpty { source } => vec![source],
            Self::Skip { source, count } | Self::Take { source, count } => vec![source, count],
            Self::Element {
                source, predicate, ..
            }
            | Self::Any { source, predicate } => {
                let mut v = vec![source];
                v.extend(predicate);
                v
            }
            Self::Aggregate {
                source, selector, ..
            } => {
                let mut v = vec![source];
                v.extend(selector);
                v
            }
            Self::All { source, predicate } => vec![source, predicate],
            Self::Contains { source, item } => vec![source, item],
            Self::SetOp { left, right, .. } => vec![left, right],
        }
    }

    /// Rebuilds the operator with new children, in the order of
    /// [`QueryOp::children`].
    pub fn with_children(&self, mut children: Vec<ExprRef>) -> Result<Self> {
        children.reverse();
        let mut next = || {
            children
                .pop()
                .ok_or_else(|| QueryError::invalid(format!("{} arity mismatch", self.name())))
        };
        Ok(match self {
            Self::Source { entity } => Self::Source {
                entity: entity.clone(),
            },
            Self::Where { .. } => Self::Where {
                source: next()?,
                predicate: next()?,
            },
            Self::Select { .. } => Self::Select {
                source: next()?,
                selector: next()?,
            },
            Self::SelectMany { result, .. } => Self::SelectMany {
                source: next()?,
                collection: next()?,
                result: result.as_ref().map(|_| next()).transpose()?,
            },
            Self::Join { .. } => Self::Join {
                outer: next()?,
                inner: next()?,
                outer_key: next()?,
                inner_key: next()?,
                result: next()?,
            },
            Self::GroupJoin { .. } => Self::GroupJoin {
                outer: next()?,
                inner: next()?,
                outer_key: next()?,
                inner_key: next()?,
                result: next()?,
            },
            Self::OrderBy {
                descending, then, ..
            } => Self::OrderBy {
                source: next()?,
                key: next()?,
                descending: *descending,
                then: *then,
            },
            Self::GroupBy {
                element, result, ..
            } => Self::GroupBy {
                source: next()?,
                key: next()?,
                element: element.as_ref().map(|_| next()).transpose()?,
                result: result.as_ref().map(|_| next()).transpose()?,
            },
            Self::Distinct { .. } => Self::Distinct { source: next()? },
            Self::Reverse { .. } => Self::Reverse { source: next()? },
            Self::DefaultIfEmpty { .. } => Self::DefaultIfEmpty { source: next()? },
            Self::Skip { .. } => Self::Skip {
                source: next()?,
                count: next()?,
            },
            Self::Take { .. } => Self::Take {
                source: next()?,
                count: next()?,
            },
            Self::Element {
                kind, predicate, ..
            } => Self::Element {
                source: next()?,
                kind: *kind,
                predicate: predicate.as_ref().map(|_| next()).transpose()?,
            },
            Self::Aggregate { op, selector, .. } => Self::Aggregate {
                source: next()?,
                op: *op,
                selector: selector.as_ref().map(|_| next()).transpose()?,
            },
            Self::Any { predicate, .. } => Self::Any {
                source: next()?,
                predicate: predicate.as_ref().map(|_| next()).transpose()?,
            },
            Self::All { .. } => Self::All {
                source: next()?,
                predicate: next()?,
            },
            Self::Contains { .. } => Self::Contains {
                source: next()?,
                item: next()?,
            },
            Self::SetOp { kind, .. } => Self::SetOp {
                kind: *kind,
                left: next()?,
                right: next()?,
            },
        })
    }
}
