use core::fmt::{Debug, Display};
use downcast_rs::{impl_downcast, DowncastSync};

/// Trait that allows a host function to return a custom error.
///
/// Types implementing this trait convert into [`Trap`] automatically and
/// travel up through the interpreter as a boxed `HostError`. The embedder can
/// recover the concrete type again with the `downcast` family of methods.
///
/// [`Trap`]: enum.Trap.html
///
/// # Examples
///
/// ```rust
/// use core::fmt;
/// use wasmint_core::{HostError, Trap};
///
/// #[derive(Debug)]
/// struct OutOfFuel {
///     spent: u64,
/// }
///
/// impl fmt::Display for OutOfFuel {
///     fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
///         write!(f, "out of fuel after {} steps", self.spent)
///     }
/// }
///
/// impl HostError for OutOfFuel {}
///
/// fn host_call() -> Result<(), Trap> {
///     Err(OutOfFuel { spent: 1000 }.into())
/// }
///
/// match host_call() {
///     Err(Trap::Host(error)) => {
///         assert_eq!(error.downcast_ref::<OutOfFuel>().unwrap().spent, 1000);
///     }
///     _ => panic!(),
/// }
/// ```
pub trait HostError: 'static + Display + Debug + DowncastSync {}
impl_downcast!(HostError);
