//! Mutable reference cells: atoms, delays, volatiles, promises.

use crate::value::Value;

/// A single mutable cell updated by `swap!`/`reset!`.
///
/// Watches are `(key, fn)` pairs fired after every successful update with
/// `(f key atom old new)`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Atom {
    pub value: Value,
    pub watches: Vec<(Value, Value)>,
}

/// State of a [`Delay`].
#[derive(Debug, Clone)]
pub(crate) enum DelayState {
    /// Not yet forced; holds the nullary thunk.
    Pending(Value),
    /// Forced; holds the cached result. The thunk has been dropped.
    Realized(Value),
}

/// A once-only deferred computation created by `delay`.
#[derive(Debug, Clone)]
pub(crate) struct Delay {
    pub state: DelayState,
}

/// Like an atom without watches or compare semantics; a cheap building block.
#[derive(Debug, Clone, Default)]
pub(crate) struct Volatile {
    pub value: Value,
}

/// A deliver-once cell. Execution is single-threaded, so dereferencing an
/// undelivered promise is an error rather than a block.
#[derive(Debug, Clone, Default)]
pub(crate) struct Promise {
    pub value: Option<Value>,
}
