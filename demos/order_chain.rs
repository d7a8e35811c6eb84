use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tsunagi::prelude::*;
use tsunagi::Spawned;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    id: String,
    items: Vec<OrderItem>,
    total_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(dead_code)]
struct OrderItem {
    product_id: String,
    quantity: u32,
    price: f64,
}

#[derive(Debug, Clone, Serialize)]
struct Receipt {
    order_id: String,
    charged: f64,
    transaction_id: String,
}

type OrderOutcome = Outcome<Order, String>;

struct ValidateOrder;

#[async_trait]
impl AsyncStep<Order, Order, String> for ValidateOrder {
    async fn run(&self, input: OrderOutcome) -> OrderOutcome {
        let order = match input {
            Outcome::Success(order) => order,
            Outcome::Failure(error) => return Outcome::failure(error),
        };
        println!("Validating order {}...", order.id);
        if order.items.is_empty() {
            return Outcome::failure(format!("order {} has no items", order.id));
        }
        Outcome::success(order)
    }
}

struct PriceOrder;

#[async_trait]
impl AsyncStep<Order, Order, String> for PriceOrder {
    async fn run(&self, input: OrderOutcome) -> OrderOutcome {
        let mut order = match input {
            Outcome::Success(order) => order,
            Outcome::Failure(error) => return Outcome::failure(error),
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        order.total_amount = order
            .items
            .iter()
            .map(|item| item.price * item.quantity as f64)
            .sum();
        println!("Order {} totals {:.2}", order.id, order.total_amount);
        Outcome::success(order)
    }
}

/// Payment gateway that times out on the first two attempts.
struct ChargeCard {
    order: Order,
}

#[async_trait]
impl AsyncRetryStep<Receipt, String> for ChargeCard {
    async fn run(&self, attempt: u32) -> Outcome<Receipt, String> {
        println!("Charging order {} (attempt {})...", self.order.id, attempt + 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if attempt < 2 {
            return Outcome::failure("payment gateway timed out".to_string());
        }
        Outcome::success(Receipt {
            order_id: self.order.id.clone(),
            charged: self.order.total_amount,
            transaction_id: format!("TXN-{}", self.order.id),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let order: Order = serde_json::from_str(
        r#"{
            "id": "ORD-001",
            "items": [
                {"product_id": "PROD-1", "quantity": 2, "price": 29.99},
                {"product_id": "PROD-2", "quantity": 1, "price": 49.99}
            ],
            "total_amount": 0.0
        }"#,
    )?;

    let handle = Handle::current();
    let priced = Chain::<Order, String>::starting_with(order)
        .then(spawn(handle.clone(), ValidateOrder))
        .then(spawn(handle.clone(), PriceOrder))
        .run()
        .await?;

    let order = match priced {
        Outcome::Success(order) => order,
        Outcome::Failure(error) => {
            println!("Order rejected: {}", error);
            return Ok(());
        }
    };

    let gateway = ChargeCard { order };
    let receipt = Chain::<(), String>::new()
        .then_with_backoff(
            RetryPolicy::exponential(3, Duration::from_millis(100)),
            spawn(handle, gateway),
        )
        .catch_error(|next: Next<Receipt, String>, failed: Outcome<Receipt, String>| {
            println!("Payment failed: {:?}", failed.error());
            next.call(failed)
        })
        .with_scheduler(TokioScheduler::current()?)
        .run()
        .await?;

    match receipt {
        Outcome::Success(receipt) => {
            println!("Order processed: {}", serde_json::to_string(&receipt)?)
        }
        Outcome::Failure(error) => println!("Order failed: {}", error),
    }

    // an empty order is rejected before it is priced
    let empty = Order {
        id: "ORD-002".to_string(),
        items: Vec::new(),
        total_amount: 0.0,
    };
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let outcome = Chain::<Order, String>::starting_with(empty)
        .then(Spawned::current(ValidateOrder)?)
        .then(move |next: Next<Order, String>, input: OrderOutcome| {
            counter.fetch_add(1, Ordering::SeqCst);
            next.call(input)
        })
        .run()
        .await?;
    println!(
        "Second order: {:?} (later stages ran {} times)",
        outcome,
        calls.load(Ordering::SeqCst)
    );

    Ok(())
}
