//! Deterministic identity for catalog entities.
//!
//! Ids are built from external ids so that repeated discovery of the same
//! remote object always lands on the same ledger key.

pub fn product_id(source_id: &str, product_external_id: &str) -> String {
    format!("{}:{}", source_id, product_external_id)
}

pub fn delivery_id(product_id: &str, delivery_external_id: &str) -> String {
    format!("{}:{}", product_id, delivery_external_id)
}

pub fn file_id(product_id: &str, delivery_external_id: &str, file_external_id: &str) -> String {
    format!(
        "{}:{}:{}",
        product_id, delivery_external_id, file_external_id
    )
}
