use std::any::TypeId;
use std::borrow::Cow;
use std::fmt;

/// The type a lookup or dependency is expressed against.
///
/// A contract is identified by the Rust type (trait objects included) and an
/// optional qualifier. An unqualified contract matches every bean of that
/// type; a qualified one only matches beans registered under the same name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Contract {
    type_id: TypeId,
    type_name: &'static str,
    qualifier: Option<Cow<'static, str>>,
}

impl Contract {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            qualifier: None,
        }
    }

    pub fn named(mut self, qualifier: impl Into<Cow<'static, str>>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    /// Whether a bean registered under `provided` satisfies a request for `self`.
    pub fn is_satisfied_by(&self, provided: &Contract) -> bool {
        if self.type_id != provided.type_id {
            return false;
        }
        match &self.qualifier {
            Some(wanted) => provided.qualifier.as_deref() == Some(wanted.as_ref()),
            None => true,
        }
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}@{}", self.type_name, q),
            None => f.write_str(self.type_name),
        }
    }
}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Contract({})", self)
    }
}

/// The shape of a requested lookup result.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
pub enum Cardinality {
    /// Exactly one bean must match.
    Single,
    /// Zero or one bean may match.
    Optional,
    /// Every matching bean, in registration order.
    Collection,
}

/// A single dependency edge declared by a bean descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    contract: Contract,
    cardinality: Cardinality,
    deferred: bool,
}

impl Dependency {
    pub fn new(contract: Contract, cardinality: Cardinality) -> Self {
        Self {
            contract,
            cardinality,
            deferred: false,
        }
    }

    pub fn single<T: ?Sized + 'static>() -> Self {
        Self::new(Contract::of::<T>(), Cardinality::Single)
    }

    pub fn optional<T: ?Sized + 'static>() -> Self {
        Self::new(Contract::of::<T>(), Cardinality::Optional)
    }

    pub fn collection<T: ?Sized + 'static>() -> Self {
        Self::new(Contract::of::<T>(), Cardinality::Collection)
    }

    /// A dependency injected as a [`Lazy`](crate::di::Lazy) handle.
    ///
    /// The target is resolved on first access rather than during construction,
    /// so deferred edges never take part in construction cycles.
    pub fn deferred<T: ?Sized + 'static>() -> Self {
        Self {
            contract: Contract::of::<T>(),
            cardinality: Cardinality::Single,
            deferred: true,
        }
    }

    pub fn named(mut self, qualifier: impl Into<Cow<'static, str>>) -> Self {
        self.contract = self.contract.named(qualifier);
        self
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Store: Send + Sync {}

    #[test]
    fn test_unqualified_request_matches_any_qualifier() {
        let request = Contract::of::<dyn Store>();
        assert!(request.is_satisfied_by(&Contract::of::<dyn Store>()));
        assert!(request.is_satisfied_by(&Contract::of::<dyn Store>().named("primary")));
        assert!(!request.is_satisfied_by(&Contract::of::<String>()));
    }

    #[test]
    fn test_qualified_request_requires_same_qualifier() {
        let request = Contract::of::<dyn Store>().named("primary");
        assert!(request.is_satisfied_by(&Contract::of::<dyn Store>().named("primary")));
        assert!(!request.is_satisfied_by(&Contract::of::<dyn Store>().named("replica")));
        assert!(!request.is_satisfied_by(&Contract::of::<dyn Store>()));
    }

    #[test]
    fn test_display_includes_qualifier() {
        let contract = Contract::of::<u32>().named("port");
        assert_eq!(contract.to_string(), "u32@port");
        assert_eq!(Contract::of::<u32>().to_string(), "u32");
    }

    #[test]
    fn test_deferred_dependency_is_single() {
        let dep = Dependency::deferred::<dyn Store>().named("primary");
        assert!(dep.is_deferred());
        assert_eq!(dep.cardinality(), Cardinality::Single);
        assert_eq!(dep.contract().qualifier(), Some("primary"));
    }

    #[test]
    fn test_cardinality_parses_from_str() {
        assert_eq!("Collection".parse::<Cardinality>().unwrap(), Cardinality::Collection);
        assert_eq!(Cardinality::Optional.to_string(), "Optional");
    }
}
