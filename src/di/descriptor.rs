use super::{Contract, Dependencies, Dependency, Lazy, LazyHandle};
use crate::lifecycle::{AutoClose, PostConstruct, PreDestroy};
use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A type-erased bean instance.
///
/// The payload is always an `Arc<T>` for the bean's contract `T`, which lets
/// trait-object contracts travel through the container unchanged.
pub type Instance = Arc<dyn Any + Send + Sync>;

pub(crate) type FactoryFn = Arc<dyn Fn(&Dependencies) -> anyhow::Result<Instance> + Send + Sync>;
pub(crate) type HookFn = Arc<dyn Fn(&Instance) -> anyhow::Result<()> + Send + Sync>;
pub(crate) type ProxyFn = Arc<dyn Fn(LazyHandle) -> Instance + Send + Sync>;

/// Recovers the typed `Arc<T>` from a type-erased instance.
pub fn downcast<T: ?Sized + 'static>(instance: &Instance) -> Option<Arc<T>> {
    instance.downcast_ref::<Arc<T>>().cloned()
}

pub(crate) fn erase<T: ?Sized + Send + Sync + 'static>(instance: Arc<T>) -> Instance {
    Arc::new(instance)
}

/// Instantiation and lifetime policy of a bean.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
pub enum ScopeKind {
    /// A fresh instance for every resolution; never stored.
    Transient,
    /// One instance per container, built on first access.
    LazySingleton,
}

/// Build-time metadata describing one bean.
///
/// Descriptors are produced outside the container (usually by generated code)
/// and are immutable once handed to [`Registry::load`](super::Registry::load).
#[derive(Clone)]
pub struct BeanDescriptor {
    name: String,
    contract: Contract,
    scope: ScopeKind,
    dependencies: Vec<Dependency>,
    factory: FactoryFn,
    init: Option<HookFn>,
    destroy: Option<HookFn>,
    close: Option<HookFn>,
    auto_close: bool,
    proxy: Option<ProxyFn>,
    eager: bool,
}

impl BeanDescriptor {
    pub fn singleton<T, F>(factory: F) -> DescriptorBuilder<T>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&Dependencies) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        DescriptorBuilder::new(ScopeKind::LazySingleton, factory)
    }

    pub fn transient<T, F>(factory: F) -> DescriptorBuilder<T>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&Dependencies) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        DescriptorBuilder::new(ScopeKind::Transient, factory)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub fn scope(&self) -> ScopeKind {
        self.scope
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn is_eager(&self) -> bool {
        self.eager
    }

    pub fn is_auto_close(&self) -> bool {
        self.auto_close
    }

    pub fn is_proxiable(&self) -> bool {
        self.proxy.is_some()
    }

    pub fn has_destroy_hook(&self) -> bool {
        self.destroy.is_some()
    }

    pub(crate) fn instantiate(&self, deps: &Dependencies) -> anyhow::Result<Instance> {
        (self.factory)(deps)
    }

    pub(crate) fn init_hook(&self) -> Option<&HookFn> {
        self.init.as_ref()
    }

    pub(crate) fn destroy_hook(&self) -> Option<&HookFn> {
        self.destroy.as_ref()
    }

    /// The close operation, present only when auto-close is requested and the
    /// instance exposes one.
    pub(crate) fn close_hook(&self) -> Option<&HookFn> {
        if self.auto_close {
            self.close.as_ref()
        } else {
            None
        }
    }

    pub(crate) fn make_proxy(&self, handle: LazyHandle) -> Option<Instance> {
        self.proxy.as_ref().map(|proxy| proxy(handle))
    }
}

impl fmt::Debug for BeanDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDescriptor")
            .field("name", &self.name)
            .field("contract", &self.contract)
            .field("scope", &self.scope)
            .field("dependencies", &self.dependencies)
            .field("init", &self.init.is_some())
            .field("destroy", &self.destroy.is_some())
            .field("auto_close", &self.auto_close)
            .field("proxiable", &self.proxy.is_some())
            .field("eager", &self.eager)
            .finish()
    }
}

/// Typed builder for [`BeanDescriptor`].
///
/// # Example
/// ```
/// use beanstalk::di::{BeanDescriptor, Dependency};
/// use std::sync::Arc;
///
/// trait Clock: Send + Sync {
///     fn now(&self) -> u64;
/// }
/// struct FixedClock;
/// impl Clock for FixedClock {
///     fn now(&self) -> u64 { 42 }
/// }
/// struct Scheduler {
///     clock: Arc<dyn Clock>,
/// }
///
/// let clock = BeanDescriptor::singleton::<dyn Clock, _>(|_| Ok(Arc::new(FixedClock)))
///     .build();
/// let scheduler = BeanDescriptor::transient::<Scheduler, _>(|deps| {
///     Ok(Arc::new(Scheduler { clock: deps.get::<dyn Clock>()? }))
/// })
/// .depends_on(Dependency::single::<dyn Clock>())
/// .build();
/// # let _ = (clock, scheduler);
/// ```
pub struct DescriptorBuilder<T: ?Sized> {
    descriptor: BeanDescriptor,
    _contract: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> DescriptorBuilder<T> {
    fn new<F>(scope: ScopeKind, factory: F) -> Self
    where
        F: Fn(&Dependencies) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        let contract = Contract::of::<T>();
        let factory: FactoryFn = Arc::new(move |deps: &Dependencies| factory(deps).map(erase));
        Self {
            descriptor: BeanDescriptor {
                name: contract.type_name().to_string(),
                contract,
                scope,
                dependencies: Vec::new(),
                factory,
                init: None,
                destroy: None,
                close: None,
                auto_close: false,
                proxy: None,
                eager: false,
            },
            _contract: PhantomData,
        }
    }

    /// Overrides the diagnostic bean name (defaults to the contract type name).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.descriptor.name = name.into();
        self
    }

    /// Registers the bean under a qualifier.
    pub fn qualifier(mut self, qualifier: impl Into<Cow<'static, str>>) -> Self {
        let qualifier = qualifier.into();
        if self.descriptor.name == self.descriptor.contract.type_name() {
            self.descriptor.name = format!("{}@{}", self.descriptor.name, qualifier);
        }
        self.descriptor.contract = self.descriptor.contract.named(qualifier);
        self
    }

    pub fn depends_on(mut self, dependency: Dependency) -> Self {
        self.descriptor.dependencies.push(dependency);
        self
    }

    pub fn on_init<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.descriptor.init = Some(typed_hook(hook));
        self
    }

    pub fn on_destroy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.descriptor.destroy = Some(typed_hook(hook));
        self
    }

    /// Marks the bean auto-close and supplies its close operation.
    pub fn close_with<F>(mut self, close: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.descriptor.close = Some(typed_hook(close));
        self.descriptor.auto_close = true;
        self
    }

    /// Supplies the lazy proxy used to break construction cycles.
    ///
    /// The proxy must implement the contract by forwarding to the [`Lazy`]
    /// target, so only trait-object contracts can realistically be proxied.
    pub fn proxy<F>(mut self, proxy: F) -> Self
    where
        F: Fn(Lazy<T>) -> Arc<T> + Send + Sync + 'static,
    {
        self.descriptor.proxy = Some(Arc::new(move |handle: LazyHandle| {
            erase(proxy(Lazy::new(handle)))
        }));
        self
    }

    /// Requests construction during boot instead of on first lookup.
    pub fn eager(mut self) -> Self {
        self.descriptor.eager = true;
        self
    }

    pub fn build(self) -> BeanDescriptor {
        self.descriptor
    }
}

impl<T: ?Sized + PostConstruct + Send + Sync + 'static> DescriptorBuilder<T> {
    pub fn post_construct(self) -> Self {
        self.on_init(|bean: &T| bean.post_construct())
    }
}

impl<T: ?Sized + PreDestroy + Send + Sync + 'static> DescriptorBuilder<T> {
    pub fn pre_destroy(self) -> Self {
        self.on_destroy(|bean: &T| bean.pre_destroy())
    }
}

impl<T: ?Sized + AutoClose + Send + Sync + 'static> DescriptorBuilder<T> {
    pub fn auto_close(self) -> Self {
        self.close_with(|bean: &T| bean.close())
    }
}

impl<T: ?Sized + Send + Sync + 'static> From<DescriptorBuilder<T>> for BeanDescriptor {
    fn from(builder: DescriptorBuilder<T>) -> Self {
        builder.build()
    }
}

fn typed_hook<T, F>(hook: F) -> HookFn
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(move |instance: &Instance| {
        let bean = downcast::<T>(instance).ok_or_else(|| {
            anyhow::anyhow!("instance is not a {}", std::any::type_name::<T>())
        })?;
        hook(&*bean)
    })
}
