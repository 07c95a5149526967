//! Host symbol table.
//!
//! Host code publishes two kinds of symbols here: raw addresses, which
//! table-linked modules bind their imports against, and typed host
//! functions, which hook sites are installed at by name.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::EventError;

/// A host function callable through its symbol name.
pub type HostFn<A, R> = Arc<dyn Fn(&A) -> R + Send + Sync>;

/// Resolves a symbol name to an address.
pub trait SymbolResolver: Send + Sync {
    fn resolve_symbol(&self, name: &str) -> Option<usize>;
}

struct TypedSymbol {
    address: usize,
    function: Arc<dyn Any + Send + Sync>,
}

/// Named exports of the host process.
#[derive(Default)]
pub struct HostSymbols {
    addresses: RwLock<HashMap<String, usize>>,
    functions: RwLock<HashMap<String, TypedSymbol>>,
}

impl HostSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a raw address.
    pub fn define_address(&self, name: impl Into<String>, address: usize) {
        let name = name.into();
        debug!(symbol = %name, address = format_args!("{address:#x}"), "Host symbol defined");
        self.addresses.write().insert(name, address);
    }

    /// Publishes a typed host function.
    pub fn define_function<A, R, F>(&self, name: impl Into<String>, function: F)
    where
        A: 'static,
        R: 'static,
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        let name = name.into();
        let typed: HostFn<A, R> = Arc::new(function);
        let address = Arc::as_ptr(&typed) as *const () as usize;
        debug!(symbol = %name, "Host function defined");
        self.functions.write().insert(
            name,
            TypedSymbol {
                address,
                function: Arc::new(typed),
            },
        );
    }

    /// Looks up a typed host function.
    pub fn resolve_function<A: 'static, R: 'static>(
        &self,
        name: &str,
    ) -> Result<HostFn<A, R>, EventError> {
        let functions = self.functions.read();
        let symbol = functions
            .get(name)
            .ok_or_else(|| EventError::SymbolMissing(name.to_string()))?;
        symbol
            .function
            .downcast_ref::<HostFn<A, R>>()
            .cloned()
            .ok_or_else(|| EventError::SignatureMismatch(name.to_string()))
    }

    /// Number of published symbols of both kinds.
    pub fn len(&self) -> usize {
        self.addresses.read().len() + self.functions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SymbolResolver for HostSymbols {
    fn resolve_symbol(&self, name: &str) -> Option<usize> {
        if let Some(address) = self.addresses.read().get(name) {
            return Some(*address);
        }
        self.functions.read().get(name).map(|s| s.address)
    }
}

impl std::fmt::Debug for HostSymbols {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSymbols")
            .field("addresses", &self.addresses.read().len())
            .field("functions", &self.functions.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addresses_and_functions_resolve() {
        let symbols = HostSymbols::new();
        symbols.define_address("host_version", 0x1234);
        symbols.define_function("add_one", |x: &i32| x + 1);

        assert_eq!(symbols.resolve_symbol("host_version"), Some(0x1234));
        assert!(symbols.resolve_symbol("add_one").is_some());
        assert_eq!(symbols.resolve_symbol("missing"), None);

        let f = symbols.resolve_function::<i32, i32>("add_one").unwrap();
        assert_eq!(f(&41), 42);
    }

    #[test]
    fn test_signature_is_checked() {
        let symbols = HostSymbols::new();
        symbols.define_function("len", |s: &String| s.len());

        assert!(matches!(
            symbols.resolve_function::<String, u32>("len"),
            Err(EventError::SignatureMismatch(_))
        ));
        assert!(matches!(
            symbols.resolve_function::<String, usize>("nope"),
            Err(EventError::SymbolMissing(_))
        ));
    }
}
