//! Memoized translation rules for built-in operations.
//!
//! A rule is looked up by `(dialect, type tag, member/method name)` and built at
//! most a handful of times per process: the cache is read-mostly and populated
//! with get-or-create semantics. Every rule is a pure function of its key, so
//! two threads racing to build the same entry produce interchangeable values
//! and whichever lands first wins.

use super::Dialect;
use super::rules;
use crate::error::OrmResult;
use crate::value::{Value, ValueType};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// The declaring type of a built-in operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    DateTime,
    Date,
    Duration,
    String,
    Math,
    Uuid,
    Collection,
}

impl TypeTag {
    /// The tag that owns instance members of a value type.
    pub fn for_type(vt: &ValueType) -> Option<TypeTag> {
        match vt {
            ValueType::DateTime | ValueType::DateTimeUtc => Some(TypeTag::DateTime),
            ValueType::Date => Some(TypeTag::Date),
            ValueType::Interval => Some(TypeTag::Duration),
            ValueType::Text => Some(TypeTag::String),
            ValueType::I16 | ValueType::I32 | ValueType::I64 | ValueType::F64 => {
                Some(TypeTag::Math)
            }
            ValueType::Uuid => Some(TypeTag::Uuid),
            ValueType::Array(_) => Some(TypeTag::Collection),
            _ => None,
        }
    }
}

/// Cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub dialect: Dialect,
    pub tag: TypeTag,
    pub name: String,
}

/// One compiled operand as seen by a rule's SQL emitter.
#[derive(Debug, Clone, Copy)]
pub struct Operand<'a> {
    /// Rendered SQL. Empty for operands the rule consumes inline.
    pub sql: &'a str,
    pub value_type: &'a ValueType,
    /// Host value, when the operand is a constant.
    pub constant: Option<&'a Value>,
    /// For expanded constant collections: number of placeholders in `sql`.
    pub list_len: Option<usize>,
}

/// Result type of a rule application.
#[derive(Debug, Clone)]
pub enum ResultType {
    Fixed(ValueType),
    /// Same type as operand 0.
    SameAsFirst,
    /// Wider numeric type of all operands.
    Merged,
}

pub type EmitFn = Box<dyn Fn(&[Operand<'_>]) -> OrmResult<String> + Send + Sync>;
pub type EvalFn = fn(&[Value]) -> OrmResult<Value>;
pub type PrepareFn = fn(usize, Value) -> OrmResult<Value>;

/// A translation rule.
pub struct Rule {
    pub result: ResultType,
    /// Operand indices that must be constants and are consumed by the emitter
    /// directly (never bound as parameters).
    pub inline: &'static [usize],
    /// Host-side evaluation, used when every operand is a constant.
    pub eval: Option<EvalFn>,
    /// Rewrites a constant operand before it is bound.
    pub prepare: Option<PrepareFn>,
    /// `false` when the emitted predicate cannot be wrapped in NOT.
    pub negatable: bool,
    pub emit: EmitFn,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("result", &self.result)
            .field("inline", &self.inline)
            .field("eval", &self.eval.is_some())
            .field("negatable", &self.negatable)
            .finish()
    }
}

impl Rule {
    pub(crate) fn new(result: ResultType, emit: EmitFn) -> Self {
        Self {
            result,
            inline: &[],
            eval: None,
            prepare: None,
            negatable: true,
            emit,
        }
    }

    pub(crate) fn eval(mut self, eval: EvalFn) -> Self {
        self.eval = Some(eval);
        self
    }

    pub(crate) fn inline(mut self, inline: &'static [usize]) -> Self {
        self.inline = inline;
        self
    }

    pub(crate) fn prepare(mut self, prepare: PrepareFn) -> Self {
        self.prepare = Some(prepare);
        self
    }

    pub(crate) fn not_negatable(mut self) -> Self {
        self.negatable = false;
        self
    }

    /// Resolve the result type for the given operand types.
    pub fn result_type(&self, operands: &[&ValueType]) -> ValueType {
        match &self.result {
            ResultType::Fixed(vt) => vt.clone(),
            ResultType::SameAsFirst => operands
                .first()
                .map(|t| (*t).clone())
                .unwrap_or(ValueType::Unknown),
            ResultType::Merged => operands
                .iter()
                .fold(ValueType::Unknown, |acc, t| acc.merge(t)),
        }
    }
}

type RuleCache = RwLock<HashMap<RuleKey, Option<Arc<Rule>>>>;

fn cache() -> &'static RuleCache {
    static RULES: OnceLock<RuleCache> = OnceLock::new();
    RULES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Look up (building on first use) the rule for an operation.
///
/// Returns `None` when the dialect has no translation; absence is memoized too.
pub fn lookup(dialect: Dialect, tag: TypeTag, name: &str) -> Option<Arc<Rule>> {
    let key = RuleKey {
        dialect,
        tag,
        name: name.to_string(),
    };

    {
        let map = cache().read().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = map.get(&key) {
            return hit.clone();
        }
    }

    let built = rules::build(dialect, tag, name).map(Arc::new);
    let mut map = cache().write().unwrap_or_else(|e| e.into_inner());
    map.entry(key).or_insert(built).clone()
}

/// Number of memoized entries (including memoized misses).
pub fn cached_rules() -> usize {
    cache().read().unwrap_or_else(|e| e.into_inner()).len()
}
