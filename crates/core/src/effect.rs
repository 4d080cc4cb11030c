//! Effect families, declared effects and the constructor registry.
//!
//! Every contract clause names an effect through a constructor such as
//! `OpenedTransaction(this)` or `CatchesException<IOException>()`. The
//! [`EffectRegistry`] decides which family a constructor belongs to;
//! each family has its own fact shape and merge rule in the analyzer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The pluggable kinds of contextual effect sharing one tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EffectFamily {
    /// "An exception of type X will be caught by an enclosing handler."
    ExceptionCatch,
    /// "This receiver is the innermost DSL scope."
    DslMarker,
    /// "Member f has been called on this receiver n times."
    CallCount,
    /// "This resource is open": started and closed explicitly.
    OpenClose,
}

impl EffectFamily {
    pub fn name(&self) -> &'static str {
        match self {
            EffectFamily::ExceptionCatch => "exception-catch",
            EffectFamily::DslMarker => "dsl-marker",
            EffectFamily::CallCount => "call-count",
            EffectFamily::OpenClose => "open-close",
        }
    }

    /// Human-readable obligation for a fact of this family.
    ///
    /// `token` is the family payload (exception type, callee id or effect
    /// constructor name) and `receiver` the display form of the reference.
    pub fn render_obligation(&self, token: &str, receiver: &str) -> String {
        match self {
            EffectFamily::ExceptionCatch => {
                format!("exception '{}' must be caught by an enclosing handler", token)
            }
            EffectFamily::DslMarker => {
                format!("'{}' must be the innermost DSL receiver in scope", receiver)
            }
            EffectFamily::CallCount => {
                format!("'{}' must have been called on '{}'", token, receiver)
            }
            EffectFamily::OpenClose => format!("'{}' must be in state {}", receiver, token),
        }
    }
}

impl fmt::Display for EffectFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How many times a lambda parameter is invoked in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InvocationKind {
    ExactlyOnce,
    AtLeastOnce,
    AtMostOnce,
    Unknown,
}

impl InvocationKind {
    /// Accepts `EXACTLY_ONCE` and friends as written in contract blocks.
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "EXACTLY_ONCE" => Some(InvocationKind::ExactlyOnce),
            "AT_LEAST_ONCE" => Some(InvocationKind::AtLeastOnce),
            "AT_MOST_ONCE" => Some(InvocationKind::AtMostOnce),
            "UNKNOWN" => Some(InvocationKind::Unknown),
            _ => None,
        }
    }

    /// Inclusive `(min, max)` call bounds; `None` max is unbounded.
    pub fn bounds(&self) -> (u32, Option<u32>) {
        match self {
            InvocationKind::ExactlyOnce => (1, Some(1)),
            InvocationKind::AtLeastOnce => (1, None),
            InvocationKind::AtMostOnce => (0, Some(1)),
            InvocationKind::Unknown => (0, None),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            InvocationKind::ExactlyOnce => "exactly once",
            InvocationKind::AtLeastOnce => "at least once",
            InvocationKind::AtMostOnce => "at most once",
            InvocationKind::Unknown => "any number of times",
        }
    }
}

impl fmt::Display for InvocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A receiver as written at the declaration site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiverRef {
    /// `this` of the declaring class.
    This,
    /// A value parameter of the declaring callable.
    Param(String),
    /// `receiverOf(lambda)`: the implicit receiver inside a lambda parameter.
    ReceiverOf(String),
}

impl fmt::Display for ReceiverRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiverRef::This => f.write_str("this"),
            ReceiverRef::Param(p) => f.write_str(p),
            ReceiverRef::ReceiverOf(p) => write!(f, "receiverOf({})", p),
        }
    }
}

/// A declared effect, before resolution against a call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    CatchesException { exception: String },
    DslMarkers { receiver: ReceiverRef },
    Calls { callee: String, receiver: ReceiverRef },
    OpenClose { name: String, receiver: ReceiverRef },
}

impl Effect {
    pub fn family(&self) -> EffectFamily {
        match self {
            Effect::CatchesException { .. } => EffectFamily::ExceptionCatch,
            Effect::DslMarkers { .. } => EffectFamily::DslMarker,
            Effect::Calls { .. } => EffectFamily::CallCount,
            Effect::OpenClose { .. } => EffectFamily::OpenClose,
        }
    }

    /// `None` for effects not attached to a receiver.
    pub fn receiver(&self) -> Option<&ReceiverRef> {
        match self {
            Effect::CatchesException { .. } => None,
            Effect::DslMarkers { receiver }
            | Effect::Calls { receiver, .. }
            | Effect::OpenClose { receiver, .. } => Some(receiver),
        }
    }

    /// Family payload used to key facts.
    pub fn token(&self) -> &str {
        match self {
            Effect::CatchesException { exception } => exception,
            Effect::DslMarkers { .. } => "",
            Effect::Calls { callee, .. } => callee,
            Effect::OpenClose { name, .. } => name,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::CatchesException { exception } => {
                write!(f, "CatchesException<{}>()", exception)
            }
            Effect::DslMarkers { receiver } => write!(f, "DslMarkers({})", receiver),
            Effect::Calls { callee, receiver } => write!(f, "Calls({}, {})", callee, receiver),
            Effect::OpenClose { name, receiver } => write!(f, "{}({})", name, receiver),
        }
    }
}

/// `expectsTo` payload: `CallKind(Owner::member, kind, receiverOf(lambda))`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallKind {
    pub callee: String,
    pub kind: InvocationKind,
    pub receiver: ReceiverRef,
}

/// Maps effect constructor names to families.
#[derive(Debug, Clone, Serialize)]
pub struct EffectRegistry {
    constructors: BTreeMap<String, EffectFamily>,
}

impl EffectRegistry {
    /// A registry with no constructors at all.
    pub fn empty() -> Self {
        EffectRegistry {
            constructors: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, constructor: impl Into<String>, family: EffectFamily) {
        self.constructors.insert(constructor.into(), family);
    }

    pub fn family_of(&self, constructor: &str) -> Option<EffectFamily> {
        self.constructors.get(constructor).copied()
    }

    pub fn constructors(&self) -> impl Iterator<Item = (&str, EffectFamily)> {
        self.constructors.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        let mut registry = EffectRegistry::empty();
        registry.register("CatchesException", EffectFamily::ExceptionCatch);
        registry.register("DslMarkers", EffectFamily::DslMarker);
        registry.register("Calls", EffectFamily::CallCount);
        registry.register("OpenedTransaction", EffectFamily::OpenClose);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_knows_builtin_families() {
        let r = EffectRegistry::default();
        assert_eq!(r.family_of("DslMarkers"), Some(EffectFamily::DslMarker));
        assert_eq!(r.family_of("OpenedTransaction"), Some(EffectFamily::OpenClose));
        assert_eq!(r.family_of("OpenedFile"), None);
    }

    #[test]
    fn registered_constructor_resolves() {
        let mut r = EffectRegistry::default();
        r.register("OpenedFile", EffectFamily::OpenClose);
        assert_eq!(r.family_of("OpenedFile"), Some(EffectFamily::OpenClose));
        assert_eq!(r.constructors().count(), 5);
    }

    #[test]
    fn invocation_kind_keywords_and_bounds() {
        assert_eq!(
            InvocationKind::from_keyword("AT_MOST_ONCE"),
            Some(InvocationKind::AtMostOnce)
        );
        assert_eq!(InvocationKind::from_keyword("twice"), None);
        assert_eq!(InvocationKind::AtLeastOnce.bounds(), (1, None));
        assert_eq!(InvocationKind::Unknown.bounds(), (0, None));
    }

    #[test]
    fn obligations_render_per_family() {
        let msg = EffectFamily::OpenClose.render_obligation("OpenedTransaction", "tx");
        assert_eq!(msg, "'tx' must be in state OpenedTransaction");
        let msg = EffectFamily::ExceptionCatch.render_obligation("IOException", "");
        assert!(msg.contains("IOException"));
    }

    #[test]
    fn effect_display_round_trips_syntax_shape() {
        let e = Effect::Calls {
            callee: "XYZBuilder.setValX".into(),
            receiver: ReceiverRef::ReceiverOf("init".into()),
        };
        assert_eq!(e.to_string(), "Calls(XYZBuilder.setValX, receiverOf(init))");
        assert_eq!(e.family(), EffectFamily::CallCount);
        assert_eq!(e.token(), "XYZBuilder.setValX");
    }
}
