//! Load test for the webhook. Point the service at a stub Bot API
//! (`TELEGRAM_API_BASE`) before running this, or replies will hit the real one.

use goose::prelude::*;
use rand::Rng;
use serde_json::json;

const LOOP_SIZES: [u32; 4] = [10, 100, 1_000, 10_000];

fn update_payload(chat_id: i64, text: &str) -> serde_json::Value {
    json!({
        "update_id": rand::rng().random_range(1..i64::MAX),
        "message": {
            "message_id": 1,
            "chat": {"id": chat_id, "type": "private"},
            "from": {"id": chat_id, "is_bot": false, "username": "goose"},
            "text": text,
        },
    })
}

fn random_chat_id() -> i64 {
    rand::rng().random_range(1_000_000..9_999_999)
}

async fn post_update(user: &mut GooseUser, payload: &serde_json::Value) -> TransactionResult {
    let mut goose = user.post_json("/", payload).await?;
    let response = goose
        .response
        .map_err(TransactionError::from)
        .map_err(Box::new)?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(TransactionError::from)
        .map_err(Box::new)?;
    if !status.is_success() || body != "ok" {
        return user.set_failure(
            &format!("status {}", status.as_u16()),
            &mut goose.request,
            None,
            Some(&body),
        );
    }
    Ok(())
}

async fn run_immediately(user: &mut GooseUser) -> TransactionResult {
    let size = LOOP_SIZES[rand::rng().random_range(0..LOOP_SIZES.len())];
    let payload = update_payload(
        random_chat_id(),
        &format!("/run print(sum(range({size})))"),
    );
    post_update(user, &payload).await
}

async fn two_round_session(user: &mut GooseUser) -> TransactionResult {
    let chat_id = random_chat_id();
    let script = "/run a = input('a?')\nb = input('b?')\nprint(a * b)";
    post_update(user, &update_payload(chat_id, script)).await?;
    let a: u32 = rand::rng().random_range(1..100);
    post_update(user, &update_payload(chat_id, &a.to_string())).await?;
    post_update(user, &update_payload(chat_id, "3")).await
}

async fn cancel_without_session(user: &mut GooseUser) -> TransactionResult {
    post_update(user, &update_payload(random_chat_id(), "/cancel")).await
}

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("webhook")
                .register_transaction(transaction!(run_immediately).set_weight(4)?)
                .register_transaction(transaction!(two_round_session).set_weight(2)?)
                .register_transaction(transaction!(cancel_without_session)),
        )
        .execute()
        .await?;
    Ok(())
}
