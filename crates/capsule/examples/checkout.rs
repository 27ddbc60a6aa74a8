//! Checkout pipeline built from capsule steps.
//!
//! Demonstrates:
//! - Parameters resolved from the store by name
//! - Setter steps feeding later steps
//! - A cached value short-circuiting a lookup via run-if-blank
//! - Halting on a business rule
//! - Routing a typed failure to a catch step

use capsule::prelude::*;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("payment declined: {0}")]
struct PaymentDeclined(String);

fn pricing_steps() -> Vec<Step> {
    vec![
        Step::new(|inv| {
            let items = inv.arg_as::<Vec<(String, f64, u32)>>("items")?;
            let subtotal: f64 = items
                .iter()
                .map(|(_, price, qty)| price * f64::from(*qty))
                .sum();
            Ok(json!(subtotal))
        })
        .label("subtotal")
        .param(Param::new("items").kind(ParamKind::List))
        .setter("subtotal"),
        Step::constant(json!(0.2))
            .label("load tax rate")
            .setter("tax_rate")
            .run_if_blank("tax_rate"),
        Step::new(|inv| {
            let subtotal = inv.arg_as::<f64>("subtotal")?;
            let rate = inv.arg_as::<f64>("tax_rate")?;
            Ok(json!((subtotal * (1.0 + rate) * 100.0).round() / 100.0))
        })
        .label("total")
        .param("subtotal")
        .param("tax_rate")
        .setter("total"),
    ]
}

fn checkout(items: Value, limit: f64) -> Result<Option<Value>, CapsuleError> {
    let mut capsule = Capsule::new();
    capsule
        .set("items", items)
        .set("limit", json!(limit))
        .through(pricing_steps())
        .then(
            Step::new(|inv| {
                let total = inv.arg_as::<f64>("total")?;
                let limit = inv.arg_as::<f64>("limit")?;
                if total > limit {
                    return Err(inv.halt(json!({"status": "review", "total": total})));
                }
                Ok(Value::Null)
            })
            .label("fraud limit")
            .param("total")
            .param("limit"),
        )
        .then(
            Step::new(|inv| {
                let total = inv.arg_as::<f64>("total")?;
                if total > 100.0 {
                    return Err(CapsuleError::step(PaymentDeclined(format!(
                        "{:.2} exceeds card limit",
                        total
                    ))));
                }
                Ok(json!({"status": "paid", "total": total}))
            })
            .label("charge")
            .param("total")
            .setter("receipt"),
        )
        .then(
            Step::new(|inv| {
                let message = inv.arg_as::<String>("message")?;
                inv.set("receipt", json!({"status": "declined", "reason": message}));
                Ok(Value::Null)
            })
            .label("declined")
            .param("message")
            .catch(Catch::of::<PaymentDeclined>()),
        );

    capsule.then_return("receipt")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let small = json!([["book", 12.5, 2], ["pen", 1.5, 4]]);
    let large = json!([["laptop", 950.0, 1]]);
    let medium = json!([["headphones", 90.0, 1]]);

    println!("small order: {}", checkout(small, 500.0)?.unwrap_or_default());
    println!("large order: {}", checkout(large, 500.0)?.unwrap_or_default());
    println!("medium order: {}", checkout(medium, 500.0)?.unwrap_or_default());

    Ok(())
}
