use std::sync::Arc;
use stockpile_core::StockService;

#[derive(Clone)]
pub struct AppState {
    pub stock: Arc<dyn StockService>,
}

impl AppState {
    pub fn new(stock: Arc<dyn StockService>) -> Self {
        Self { stock }
    }
}
