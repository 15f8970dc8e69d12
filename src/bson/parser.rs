//! Parser combinators (component G): declarative decomposition of a
//! document into typed fields, with diagnostics that name the failing
//! field path.
//!
//! A [`Rule`] is tried against each element of a document in `doc()`'s
//! rule list order; the first rule whose `key` matches (or that is a
//! wildcard) "claims" the element and its `validate` closure runs. Claimed
//! rules that reject are escalated to document-level errors — a present
//! field of the wrong shape is a hard error, not a silent "field absent".

use super::value::ValueRef;
use super::view::{ElementRef, View};
use std::cell::RefCell;
use std::rc::Rc;

/// Result of trying one [`Rule`] against one element.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// This rule does not apply to the element; try the next rule.
    Reject,
    /// This rule applies, but the element failed validation.
    Error(String),
    /// This rule applies and the element is valid.
    Accept,
}

impl Outcome {
    #[must_use]
    pub fn is_accept(&self) -> bool {
        matches!(self, Outcome::Accept)
    }
}

/// One decomposition rule. Built by the combinator functions in this
/// module, never constructed directly.
pub struct Rule {
    key: Option<String>,
    required: bool,
    catch_all: bool,
    validate: Box<dyn FnMut(&ElementRef) -> Outcome>,
}

impl Rule {
    fn leaf(validate: impl FnMut(&ElementRef) -> Outcome + 'static) -> Self {
        Rule { key: None, required: false, catch_all: false, validate: Box::new(validate) }
    }
}

/// `field(key, R)`: claims only elements whose key equals `key`.
pub fn field(key: impl Into<String>, mut inner: Rule) -> Rule {
    let key = key.into();
    Rule {
        key: Some(key),
        required: false,
        catch_all: false,
        validate: Box::new(move |el| (inner.validate)(el)),
    }
}

/// `must(R)`: turns a `Reject` from the wrapped rule into an `Error`, and
/// marks the rule as required so `doc()` checks it was matched by some
/// element.
pub fn must(mut inner: Rule) -> Rule {
    let key = inner.key.take();
    Rule {
        key,
        required: true,
        catch_all: false,
        validate: Box::new(move |el| match (inner.validate)(el) {
            Outcome::Reject => Outcome::Error(format!("missing required field \"{}\"", el.key)),
            other => other,
        }),
    }
}

/// `require(key, R) := must(field(key, R))`.
pub fn require(key: impl Into<String>, inner: Rule) -> Rule {
    must(field(key, inner))
}

/// `reject_others{}`: a catch-all placed at the end of a `doc()` rule list;
/// any element not claimed by an earlier rule makes the document error.
pub fn reject_others() -> Rule {
    Rule { key: None, required: false, catch_all: true, validate: Box::new(|_| Outcome::Accept) }
}

/// `type<T>(R)`: decodes the element's value via `ValueRef::from_element`
/// and hands the result to `then`, converting a BSON decode failure or a
/// type mismatch into `Reject` (so an outer `must`/`require` turns it into
/// an error, and a bare `field` lets a later alternative rule try instead).
pub fn typed(mut then: impl FnMut(&ValueRef) -> Outcome + 'static) -> Rule {
    Rule::leaf(move |el| match ValueRef::from_element(el) {
        Ok(v) => then(&v),
        Err(_) => Outcome::Reject,
    })
}

/// `store(dest)`: accepts an Int32 element and stores it into `dest`.
pub fn store_i32(dest: Rc<RefCell<Option<i32>>>) -> Rule {
    typed(move |v| match v {
        ValueRef::Int32(i) => {
            *dest.borrow_mut() = Some(*i);
            Outcome::Accept
        }
        _ => Outcome::Reject,
    })
}

/// `store(dest)`: accepts an Int64 element and stores it into `dest`.
pub fn store_i64(dest: Rc<RefCell<Option<i64>>>) -> Rule {
    typed(move |v| match v {
        ValueRef::Int64(i) => {
            *dest.borrow_mut() = Some(*i);
            Outcome::Accept
        }
        ValueRef::Int32(i) => {
            *dest.borrow_mut() = Some(i64::from(*i));
            Outcome::Accept
        }
        _ => Outcome::Reject,
    })
}

/// `store(dest)`: accepts a UTF-8 element and stores an owned copy.
pub fn store_utf8(dest: Rc<RefCell<Option<String>>>) -> Rule {
    typed(move |v| match v {
        ValueRef::Utf8(s) => {
            *dest.borrow_mut() = Some((*s).to_owned());
            Outcome::Accept
        }
        _ => Outcome::Reject,
    })
}

/// `store(dest)`: accepts a Bool element.
pub fn store_bool(dest: Rc<RefCell<Option<bool>>>) -> Rule {
    typed(move |v| match v {
        ValueRef::Bool(b) => {
            *dest.borrow_mut() = Some(*b);
            Outcome::Accept
        }
        _ => Outcome::Reject,
    })
}

/// `action(fn)`: leaf rule that always accepts and runs a side effect.
pub fn action(mut f: impl FnMut(&ElementRef) + 'static) -> Rule {
    Rule::leaf(move |el| {
        f(el);
        Outcome::Accept
    })
}

/// `any(Rs…)`: short-circuiting disjunction over the same element — the
/// first rule that doesn't reject wins.
pub fn any(mut rules: Vec<Rule>) -> Rule {
    Rule::leaf(move |el| {
        for r in &mut rules {
            match (r.validate)(el) {
                Outcome::Reject => continue,
                other => return other,
            }
        }
        Outcome::Reject
    })
}

/// `all(Rs…)`: short-circuiting conjunction over the same element — the
/// first rule that isn't `Accept` wins.
pub fn all(mut rules: Vec<Rule>) -> Rule {
    Rule::leaf(move |el| {
        for r in &mut rules {
            match (r.validate)(el) {
                Outcome::Accept => continue,
                other => return other,
            }
        }
        Outcome::Accept
    })
}

/// `each(R)`: applies `inner` to every element of a nested Document/Array
/// value. The first rejection fails, naming the offending nested key.
pub fn each(mut inner: Rule) -> Rule {
    Rule::leaf(move |el| {
        let nested = match ValueRef::from_element(el) {
            Ok(ValueRef::Document(v) | ValueRef::Array(v)) => v,
            Ok(_) => return Outcome::Reject,
            Err(_) => return Outcome::Reject,
        };
        for sub in nested.iter() {
            let sub = match sub {
                Ok(s) => s,
                Err(e) => return Outcome::Error(format!("malformed nested element: {e:?}")),
            };
            match (inner.validate)(&sub) {
                Outcome::Accept => {}
                Outcome::Reject => return Outcome::Error(format!("element \"{}\" rejected", sub.key)),
                Outcome::Error(msg) => return Outcome::Error(format!("element \"{}\": {msg}", sub.key)),
            }
        }
        Outcome::Accept
    })
}

/// A compiled `doc(Rs…)` rule list, ready to validate a [`View`].
pub struct DocRule {
    rules: Vec<Rule>,
}

/// `doc(Rs…)`: tries each rule against each element in list order until one
/// doesn't reject. A matched rule that errors makes the whole document
/// error. After all elements are scanned, any `required` rule that never
/// matched makes the document reject.
pub fn doc(rules: Vec<Rule>) -> DocRule {
    DocRule { rules }
}

impl DocRule {
    pub fn validate(&mut self, view: &View) -> Outcome {
        let mut matched: std::collections::HashSet<String> = std::collections::HashSet::new();
        let catch_all = self.rules.iter().any(|r| r.catch_all);

        for el in view.iter() {
            let el = match el {
                Ok(e) => e,
                Err(e) => return Outcome::Error(format!("malformed document: {e:?}")),
            };
            let mut claimed = false;
            for rule in &mut self.rules {
                let key_matches = match &rule.key {
                    Some(k) => k == el.key,
                    None => !rule.catch_all, // wildcard non-catch-all rules (each/any/all as top-level) match anything
                };
                if !key_matches {
                    continue;
                }
                claimed = true;
                match (rule.validate)(&el) {
                    Outcome::Accept => {
                        if let Some(k) = &rule.key {
                            matched.insert(k.clone());
                        }
                    }
                    Outcome::Error(msg) => return Outcome::Error(format!("field \"{}\": {msg}", el.key)),
                    Outcome::Reject => return Outcome::Error(format!("field \"{}\" rejected by matching rule", el.key)),
                }
                break;
            }
            if !claimed && catch_all {
                return Outcome::Error(format!("unexpected field \"{}\"", el.key));
            }
        }

        for rule in &self.rules {
            if rule.required {
                if let Some(k) = &rule.key {
                    if !matched.contains(k) {
                        return Outcome::Reject;
                    }
                }
            }
        }
        Outcome::Accept
    }
}
