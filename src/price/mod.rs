pub mod cache;
pub mod fx;
pub mod rest;
pub mod stream;

pub use cache::{PriceCache, PriceEntry, PriceSource};
pub use fx::FxService;
pub use rest::PriceRest;

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::db::Db;

/// The set of native symbols whose prices we keep warm. Refreshed from the
/// token table; shared between the stream writer and the REST refresher.
#[derive(Clone, Default)]
pub struct Tracked {
    symbols: Arc<RwLock<HashSet<String>>>,
}

impl Tracked {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.read().expect("tracked symbols lock").contains(symbol)
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.symbols
            .read()
            .expect("tracked symbols lock")
            .iter()
            .cloned()
            .collect()
    }

    pub fn replace(&self, symbols: Vec<String>) {
        *self.symbols.write().expect("tracked symbols lock") = symbols.into_iter().collect();
    }

    pub async fn refresh_from_db(&self, db: &Db) -> rusqlite::Result<()> {
        let conn = db.lock().await;
        let symbols = crate::store::tokens::native_symbols(&conn)?;
        drop(conn);
        self.replace(symbols);
        Ok(())
    }
}
