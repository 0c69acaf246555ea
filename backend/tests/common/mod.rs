//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use carton_ledger_backend::config::Config;
use carton_ledger_backend::services::ledger::GenerateLabelsInput;
use carton_ledger_backend::services::scan::{ScanInInput, ScanOutInput};
use carton_ledger_backend::services::{
    LedgerService, RepackService, ScanService, StocktakeService, ThresholdService,
};
use carton_ledger_backend::{AppResult, LedgerStore, MemoryLedgerStore};
use chrono::NaiveDate;
use shared::{replay, BoxType, PlannedTransition, StockItem};
use uuid::Uuid;

pub const PREFIX: &str = "RJ";

pub fn production_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

/// Services wired to one in-memory store
#[derive(Clone)]
pub struct Harness {
    pub store: Arc<dyn LedgerStore>,
    pub ledger: LedgerService,
    pub scans: ScanService,
    pub repack: RepackService,
    pub thresholds: ThresholdService,
    pub stocktake: StocktakeService,
    pub operator: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryLedgerStore::new()))
    }

    pub fn with_store(store: Arc<dyn LedgerStore>) -> Self {
        let config = Config::for_memory("test-secret");

        Self {
            ledger: LedgerService::new(store.clone()),
            scans: ScanService::new(store.clone()),
            repack: RepackService::new(store.clone(), PREFIX),
            thresholds: ThresholdService::new(store.clone()),
            stocktake: StocktakeService::new(store.clone(), config.stocktake.clone()),
            store,
            operator: Uuid::new_v4(),
        }
    }

    /// Register `count` pending cartons
    pub async fn cartons(
        &self,
        product_code: &str,
        colour: &str,
        quantity: i32,
        count: u32,
    ) -> Vec<StockItem> {
        self.ledger
            .generate_labels(
                PREFIX,
                GenerateLabelsInput {
                    product_code: product_code.to_string(),
                    colour: colour.to_string(),
                    quantity_per_carton: quantity,
                    number_of_labels: count,
                    box_type: BoxType::Full,
                    production_date: Some(production_date()),
                    notes: None,
                },
            )
            .await
            .unwrap()
            .items
    }

    /// Register and scan in `count` cartons
    pub async fn in_stock(
        &self,
        product_code: &str,
        colour: &str,
        quantity: i32,
        count: u32,
    ) -> Vec<StockItem> {
        let mut items = Vec::new();
        for carton in self.cartons(product_code, colour, quantity, count).await {
            items.push(self.scan_in(&carton.barcode_id).await.unwrap().item);
        }
        items
    }

    pub async fn scan_in(&self, barcode: &str) -> AppResult<PlannedTransition> {
        self.scans
            .scan_in(
                self.operator,
                ScanInInput {
                    barcode: barcode.to_string(),
                },
            )
            .await
    }

    pub async fn scan_out(&self, barcode: &str) -> AppResult<PlannedTransition> {
        self.scans
            .scan_out(
                self.operator,
                ScanOutInput {
                    barcode: barcode.to_string(),
                    order_id: None,
                },
            )
            .await
    }

    pub async fn item(&self, barcode: &str) -> StockItem {
        self.store.find_by_barcode(barcode).await.unwrap().unwrap()
    }

    /// Assert the movement ledger reproduces the carton's current state
    pub async fn assert_ledger_consistent(&self, barcode: &str) {
        let item = self.item(barcode).await;
        let movements = self.store.list_movements(item.id).await.unwrap();
        let replayed = replay(&movements).unwrap();
        assert!(
            replayed.matches(&item),
            "ledger for {} replays to {:?}/{} but carton is {:?}/{}",
            barcode,
            replayed.status,
            replayed.on_hand,
            item.status,
            item.quantity
        );
    }
}
