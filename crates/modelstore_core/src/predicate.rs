//! Query predicates and ordering.
//!
//! A [`Predicate`] is an expression tree evaluated against stored records.
//! Comparisons use [`Value::compare`]: integers and floats compare
//! numerically, other kinds only compare with themselves, and a comparison
//! between incomparable values never matches.
//!
//! Field names may be dotted paths (`owner.name`) into nested maps. Only
//! the first segment is checked against the entity's declared fields.

use crate::entity::EntityDescriptor;
use crate::error::{CoreError, CoreResult};
use modelstore_codec::{Record, Value};
use std::cmp::Ordering;
use std::ops::Not;

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal. Also true for incomparable values.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl CompareOp {
    fn test(self, ordering: Option<Ordering>) -> bool {
        match self {
            CompareOp::Eq => ordering == Some(Ordering::Equal),
            CompareOp::Ne => ordering != Some(Ordering::Equal),
            CompareOp::Lt => ordering == Some(Ordering::Less),
            CompareOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            CompareOp::Gt => ordering == Some(Ordering::Greater),
            CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

/// A filter over records.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `field <op> value`.
    Compare {
        /// Field path.
        field: String,
        /// Operator.
        op: CompareOp,
        /// Right-hand operand.
        value: Value,
    },
    /// `low <= field <= high`.
    Between {
        /// Field path.
        field: String,
        /// Inclusive lower bound.
        low: Value,
        /// Inclusive upper bound.
        high: Value,
    },
    /// Field equals one of `values`.
    In {
        /// Field path.
        field: String,
        /// Candidate values.
        values: Vec<Value>,
    },
    /// Text field contains `needle`, or list field contains an equal element.
    Contains {
        /// Field path.
        field: String,
        /// What to look for.
        needle: Value,
    },
    /// Text field starts with `prefix`.
    BeginsWith {
        /// Field path.
        field: String,
        /// Required prefix.
        prefix: String,
    },
    /// Field is missing or null.
    IsNull {
        /// Field path.
        field: String,
    },
    /// Every operand matches. Empty matches everything.
    And(Vec<Predicate>),
    /// Some operand matches. Empty matches nothing.
    Or(Vec<Predicate>),
    /// The operand does not match.
    Not(Box<Predicate>),
}

impl Predicate {
    fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// `field == value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    /// `field != value`.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    /// `field < value`.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    /// `field <= value`.
    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    /// `field > value`.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    /// `field >= value`.
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    /// `low <= field <= high`.
    pub fn between(
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Predicate::Between {
            field: field.into(),
            low: low.into(),
            high: high.into(),
        }
    }

    /// Field equals any of `values`.
    pub fn in_values<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Text field contains a substring, or list field contains an element.
    pub fn contains(field: impl Into<String>, needle: impl Into<Value>) -> Self {
        Predicate::Contains {
            field: field.into(),
            needle: needle.into(),
        }
    }

    /// Text field starts with `prefix`.
    pub fn begins_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Predicate::BeginsWith {
            field: field.into(),
            prefix: prefix.into(),
        }
    }

    /// Field is missing or null.
    pub fn is_null(field: impl Into<String>) -> Self {
        Predicate::IsNull {
            field: field.into(),
        }
    }

    /// Both `self` and `other` match.
    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut operands) => {
                operands.push(other);
                Predicate::And(operands)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    /// Either `self` or `other` matches.
    #[must_use]
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut operands) => {
                operands.push(other);
                Predicate::Or(operands)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    /// Calls `visit` with every field path the predicate references.
    fn for_each_field<'a>(
        &'a self,
        visit: &mut impl FnMut(&'a str) -> CoreResult<()>,
    ) -> CoreResult<()> {
        match self {
            Predicate::Compare { field, .. }
            | Predicate::Between { field, .. }
            | Predicate::In { field, .. }
            | Predicate::Contains { field, .. }
            | Predicate::BeginsWith { field, .. }
            | Predicate::IsNull { field } => visit(field),
            Predicate::And(operands) | Predicate::Or(operands) => operands
                .iter()
                .try_for_each(|operand| operand.for_each_field(visit)),
            Predicate::Not(operand) => operand.for_each_field(visit),
        }
    }

    /// Checks every referenced field against `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::QueryError`] naming the first unknown field.
    pub fn validate(&self, descriptor: &EntityDescriptor) -> CoreResult<()> {
        self.for_each_field(&mut |field| check_field(descriptor, field))
    }

    /// Evaluates the predicate against `record`.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Predicate::Compare { field, op, value } => {
                op.test(lookup(record, field).compare(value))
            }
            Predicate::Between { field, low, high } => {
                let actual = lookup(record, field);
                CompareOp::Ge.test(actual.compare(low))
                    && CompareOp::Le.test(actual.compare(high))
            }
            Predicate::In { field, values } => {
                let actual = lookup(record, field);
                values
                    .iter()
                    .any(|candidate| actual.compare(candidate) == Some(Ordering::Equal))
            }
            Predicate::Contains { field, needle } => match (lookup(record, field), needle) {
                (Value::Text(haystack), Value::Text(needle)) => {
                    haystack.contains(needle.as_str())
                }
                (Value::List(items), needle) => items
                    .iter()
                    .any(|item| item.compare(needle) == Some(Ordering::Equal)),
                _ => false,
            },
            Predicate::BeginsWith { field, prefix } => lookup(record, field)
                .as_text()
                .is_some_and(|text| text.starts_with(prefix.as_str())),
            Predicate::IsNull { field } => lookup(record, field).is_null(),
            Predicate::And(operands) => operands.iter().all(|operand| operand.matches(record)),
            Predicate::Or(operands) => operands.iter().any(|operand| operand.matches(record)),
            Predicate::Not(operand) => !operand.matches(record),
        }
    }
}

impl Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}

fn check_field(descriptor: &EntityDescriptor, path: &str) -> CoreResult<()> {
    let root = path.split('.').next().unwrap_or(path);
    if descriptor.has_field(root) {
        Ok(())
    } else {
        Err(CoreError::query_error(format!(
            "`{}` has no field `{root}`",
            descriptor.collection()
        )))
    }
}

/// Resolves a dotted path. Missing fields read as null.
fn lookup<'r>(record: &'r Record, path: &str) -> &'r Value {
    static NULL: Value = Value::Null;
    let mut segments = path.split('.');
    let mut current = record.get_or_null(segments.next().unwrap_or(path));
    for segment in segments {
        current = match current {
            Value::Map(nested) => nested.get_or_null(segment),
            _ => return &NULL,
        };
    }
    current
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// One sort criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Field path.
    pub field: String,
    /// Direction.
    pub order: SortOrder,
}

/// A filter plus an optional explicit ordering and limit.
///
/// Without sort keys, results come back in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filter: Option<Predicate>,
    sort: Vec<SortKey>,
    limit: Option<usize>,
}

impl Query {
    /// A query matching every record.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds a filter; repeated calls combine with `and`.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Adds a sort key. Earlier keys take precedence.
    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            order,
        });
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub const fn limit(mut self, count: usize) -> Self {
        self.limit = Some(count);
        self
    }

    /// Returns the filter, if any.
    #[must_use]
    pub fn predicate(&self) -> Option<&Predicate> {
        self.filter.as_ref()
    }

    /// Returns the sort keys.
    #[must_use]
    pub fn sort_keys(&self) -> &[SortKey] {
        &self.sort
    }

    /// Returns the result cap.
    #[must_use]
    pub fn result_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Checks the filter and every sort key against `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::QueryError`] for an unknown field.
    pub fn validate(&self, descriptor: &EntityDescriptor) -> CoreResult<()> {
        if let Some(filter) = &self.filter {
            filter.validate(descriptor)?;
        }
        self.sort
            .iter()
            .try_for_each(|key| check_field(descriptor, &key.field))
    }

    /// Returns whether `record` passes the filter.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |filter| filter.matches(record))
    }

    /// Orders two records by the sort keys.
    pub(crate) fn order(&self, a: &Record, b: &Record) -> Ordering {
        self.sort
            .iter()
            .map(|key| {
                let ordering = sort_order(lookup(a, &key.field), lookup(b, &key.field));
                match key.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl From<Predicate> for Query {
    fn from(predicate: Predicate) -> Self {
        Query::all().filter(predicate)
    }
}

/// Total order used for sorting: nulls first, then booleans, numbers,
/// text, bytes and finally containers, which sort as equal to each other.
#[allow(clippy::cast_precision_loss)]
fn sort_order(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Bytes(_) => 4,
            Value::List(_) | Value::Map(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        (Value::Integer(x), Value::Float(y)) => (*x as f64).total_cmp(y),
        (Value::Float(x), Value::Integer(y)) => x.total_cmp(&(*y as f64)),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEM_FIELDS: &[&str] = &["id", "name", "tags", "owner", "score"];

    fn descriptor() -> EntityDescriptor {
        struct Item;
        impl crate::entity::Persistable for Item {
            const COLLECTION: &'static str = "items";
            const FIELDS: &'static [&'static str] = ITEM_FIELDS;
            fn to_record(&self) -> Record {
                Record::new()
            }
            fn from_record(_: &Record) -> CoreResult<Self> {
                Ok(Item)
            }
        }
        EntityDescriptor::of::<Item>()
    }

    fn item(id: i64, name: &str) -> Record {
        Record::new()
            .with("id", id)
            .with("name", name)
            .with("tags", Value::list(["red", "blue"]))
            .with("owner", Record::new().with("name", "ada"))
    }

    #[test]
    fn comparisons() {
        let record = item(5, "lamp");
        assert!(Predicate::eq("id", 5).matches(&record));
        assert!(Predicate::eq("id", 5.0).matches(&record));
        assert!(Predicate::ne("id", 6).matches(&record));
        assert!(Predicate::lt("id", 6).matches(&record));
        assert!(Predicate::le("id", 5).matches(&record));
        assert!(!Predicate::gt("id", 5).matches(&record));
        assert!(Predicate::ge("id", 5).matches(&record));
        assert!(Predicate::between("id", 1, 5).matches(&record));
        assert!(!Predicate::between("id", 6, 9).matches(&record));
        assert!(Predicate::in_values("id", [1, 5, 9]).matches(&record));
    }

    #[test]
    fn incomparable_values_never_match() {
        let record = item(5, "lamp");
        assert!(!Predicate::eq("id", "5").matches(&record));
        assert!(!Predicate::lt("name", 10).matches(&record));
        assert!(Predicate::ne("id", "5").matches(&record));
    }

    #[test]
    fn text_and_list_operators() {
        let record = item(1, "desk lamp");
        assert!(Predicate::contains("name", "lamp").matches(&record));
        assert!(Predicate::contains("tags", "blue").matches(&record));
        assert!(!Predicate::contains("tags", "green").matches(&record));
        assert!(Predicate::begins_with("name", "desk").matches(&record));
        assert!(!Predicate::begins_with("id", "1").matches(&record));
        assert!(Predicate::is_null("score").matches(&record));
        assert!(!Predicate::is_null("name").matches(&record));
    }

    #[test]
    fn nested_paths() {
        let record = item(1, "lamp");
        assert!(Predicate::eq("owner.name", "ada").matches(&record));
        assert!(Predicate::is_null("owner.age").matches(&record));
        assert!(Predicate::is_null("name.first").matches(&record));
        assert!(Predicate::eq("owner.name", "ada")
            .validate(&descriptor())
            .is_ok());
    }

    #[test]
    fn combinators() {
        let record = item(3, "lamp");
        let both = Predicate::gt("id", 1).and(Predicate::eq("name", "lamp"));
        assert!(both.matches(&record));
        assert!(!(!both.clone()).matches(&record));
        assert!(Predicate::eq("id", 9)
            .or(Predicate::eq("id", 3))
            .matches(&record));
        assert!(Predicate::And(vec![]).matches(&record));
        assert!(!Predicate::Or(vec![]).matches(&record));

        let chained = Predicate::eq("id", 3)
            .and(Predicate::eq("name", "lamp"))
            .and(Predicate::is_null("score"));
        assert!(matches!(&chained, Predicate::And(operands) if operands.len() == 3));
    }

    #[test]
    fn unknown_fields_are_query_errors() {
        let err = Predicate::eq("id", 1)
            .and(Predicate::eq("colour", "red"))
            .validate(&descriptor())
            .unwrap_err();
        assert!(matches!(err, CoreError::QueryError { .. }));
        assert!(err.to_string().contains("colour"));

        let sorted = Query::all().sort_by("weight", SortOrder::Ascending);
        assert!(sorted.validate(&descriptor()).is_err());
    }

    #[test]
    fn sort_order_is_total() {
        let mut values = vec![
            Value::from("b"),
            Value::Float(1.5),
            Value::Null,
            Value::Integer(1),
            Value::Bool(true),
            Value::from("a"),
            Value::Integer(2),
        ];
        values.sort_by(sort_order);
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Integer(1),
                Value::Float(1.5),
                Value::Integer(2),
                Value::from("a"),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn query_orders_by_keys() {
        let query = Query::all()
            .sort_by("name", SortOrder::Ascending)
            .sort_by("id", SortOrder::Descending);
        let a = item(1, "lamp");
        let b = item(2, "lamp");
        let c = item(0, "desk");
        assert_eq!(query.order(&a, &b), Ordering::Greater);
        assert_eq!(query.order(&c, &a), Ordering::Less);
    }

    #[test]
    fn query_filters_combine() {
        let query = Query::from(Predicate::gt("id", 1)).filter(Predicate::lt("id", 4));
        assert!(query.matches(&item(2, "x")));
        assert!(!query.matches(&item(5, "x")));
        assert!(Query::all().matches(&item(5, "x")));
    }
}
