//! Runtime collection and reference types stored in the heap.

mod collections;
mod lazy;
mod multifn;
mod refs;

pub(crate) use collections::{List, MapColl, SetColl, Transient, Vector};
pub(crate) use lazy::LazySeq;
pub(crate) use multifn::{MultiFn, Protocol, ProtocolFn};
pub(crate) use refs::{Atom, Delay, DelayState, Promise, Volatile};
