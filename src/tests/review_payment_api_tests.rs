#[cfg(test)]
mod tests {
    use crate::tests::helpers::{setup, TestApp, ADMIN_TOKEN};
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    struct Fixture {
        buyer: String,
        lamp: String,
        desk: String,
        order_id: String,
    }

    /// A buyer with one pending order for a lamp; the desk is not in that order.
    async fn fixture(t: &TestApp) -> Fixture {
        let (_, buyer) = t.register_buyer("reviewer@example.com").await;
        let category = t.create_category("Furniture").await;
        let lamp = t.create_product(&category, "Lamp", 2500, 5).await;
        let desk = t.create_product(&category, "Desk", 9000, 5).await;
        let (status, order) = t.place_order(&buyer, &[(&lamp, 1, 2500)]).await;
        assert_eq!(status, StatusCode::CREATED, "{order}");
        let order_id = order["id"].as_str().unwrap().to_string();
        Fixture { buyer, lamp, desk, order_id }
    }

    async fn review(t: &TestApp, token: &str, product: &str, order: &str, rating: i64) -> (StatusCode, Value) {
        t.post(
            "/api/reviews",
            Some(token),
            json!({ "product_id": product, "order_id": order, "rating": rating, "comment": "  solid  " }),
        )
        .await
    }

    async fn payment_status(t: &TestApp, intent_id: &str) -> (String, i64) {
        sqlx::query_as("SELECT status, refunded_cents FROM payments WHERE payment_intent_id = ?")
            .bind(intent_id)
            .fetch_one(&t.state.db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_add_review() {
        let t = setup().await;
        let f = fixture(&t).await;

        let (status, body) = review(&t, &f.buyer, &f.lamp, &f.order_id, 4).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["rating"], 4);
        assert_eq!(body["comment"], "solid");
        assert_eq!(body["buyer_name"], "Test Buyer");
        assert_eq!(body["status"], "pending");

        let (status, _) = review(&t, &f.buyer, &f.lamp, &f.order_id, 5).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, product) = t.get(&format!("/api/products/{}", f.lamp), None).await;
        assert_eq!(product["review_count"], 1);
        assert_eq!(product["average_rating"], 4.0);

        let (status, list) = t.get(&format!("/api/reviews/product/{}", f.lamp), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (_, metrics) = t.get("/metrics", None).await;
        assert_eq!(metrics["reviews_added"], 1);
    }

    #[tokio::test]
    async fn test_review_rejections() {
        let t = setup().await;
        let f = fixture(&t).await;
        let (_, stranger) = t.register_buyer("stranger@example.com").await;

        let (status, _) = review(&t, &stranger, &f.lamp, &f.order_id, 5).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = review(&t, &f.buyer, &f.desk, &f.order_id, 5).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = review(&t, &f.buyer, &f.lamp, &f.order_id, 6).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = review(&t, ADMIN_TOKEN, &f.lamp, &f.order_id, 5).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = t.put(&format!("/api/orders/{}/cancel", f.order_id), Some(&f.buyer), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = review(&t, &f.buyer, &f.lamp, &f.order_id, 5).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "Cancelled orders cannot be reviewed");

        let (status, list) = t.get(&format!("/api/reviews/product/{}", f.lamp), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(list.as_array().unwrap().is_empty());

        let (status, _) = t.get("/api/reviews/product/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_top_rated() {
        let t = setup().await;
        let f = fixture(&t).await;
        let (status, order) = t.place_order(&f.buyer, &[(&f.desk, 1, 9000), (&f.lamp, 1, 2500)]).await;
        assert_eq!(status, StatusCode::CREATED);
        let second = order["id"].as_str().unwrap();

        review(&t, &f.buyer, &f.lamp, &f.order_id, 2).await;
        review(&t, &f.buyer, &f.lamp, second, 3).await;
        review(&t, &f.buyer, &f.desk, second, 5).await;

        let (status, top) = t.get("/api/reviews/top-rated", None).await;
        assert_eq!(status, StatusCode::OK);
        let top = top.as_array().unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0]["product_name"], "Desk");
        assert_eq!(top[0]["reviews_count"], 1);
        assert_eq!(top[1]["product_name"], "Lamp");
        assert_eq!(top[1]["average_rating"], 2.5);
        assert_eq!(top[1]["reviews_count"], 2);

        // count is clamped to at least one
        let (_, top) = t.get("/api/reviews/top-rated?count=0", None).await;
        assert_eq!(top.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pay_for_order_confirms_it() {
        let t = setup().await;
        let f = fixture(&t).await;
        let total = 2500 + 500;

        let (status, body) = t
            .post(
                "/api/payments/create-intent",
                Some(&f.buyer),
                json!({ "amount_cents": total, "order_id": f.order_id, "customer_email": "reviewer@example.com" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["success"], true);
        assert!(body["client_secret"].is_string());
        let intent = body["payment_intent_id"].as_str().unwrap().to_string();
        assert!(intent.starts_with("pi_"));
        assert_eq!(payment_status(&t, &intent).await.0, "requires_confirmation");

        let (_, stranger) = t.register_buyer("other@example.com").await;
        let (status, _) = t.post(&format!("/api/payments/confirm/{}", intent), Some(&stranger), json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = t.post(&format!("/api/payments/confirm/{}", intent), Some(&f.buyer), json!({})).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body.get("client_secret").is_none());
        assert_eq!(payment_status(&t, &intent).await.0, "succeeded");

        let (_, order) = t.get(&format!("/api/orders/{}", f.order_id), Some(&f.buyer)).await;
        assert_eq!(order["status"], "confirmed");

        let (status, _) = t.post(&format!("/api/payments/confirm/{}", intent), Some(&f.buyer), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, metrics) = t.get("/metrics", None).await;
        assert_eq!(metrics["payment_intents"], 1);
    }

    #[tokio::test]
    async fn test_create_intent_rejections() {
        let t = setup().await;
        let f = fixture(&t).await;

        let (status, body) = t
            .post("/api/payments/create-intent", Some(&f.buyer), json!({ "amount_cents": 1, "order_id": f.order_id }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"]["field"], "amount_cents");

        let (status, body) = t
            .post("/api/payments/create-intent", Some(&f.buyer), json!({ "amount_cents": 0, "currency": "euro" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"]["errors"].as_array().unwrap().len(), 2);

        let (_, stranger) = t.register_buyer("payer@example.com").await;
        let (status, _) = t
            .post("/api/payments/create-intent", Some(&stranger), json!({ "amount_cents": 3000, "order_id": f.order_id }))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = t.post("/api/payments/create-intent", None, json!({ "amount_cents": 3000 })).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = t.post("/api/payments/confirm/not-an-intent", Some(&f.buyer), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_refunds() {
        let t = setup().await;
        let (_, buyer) = t.register_buyer("refund@example.com").await;
        let (_, body) = t
            .post("/api/payments/create-intent", Some(&buyer), json!({ "amount_cents": 5000, "currency": "USD" }))
            .await;
        let intent = body["payment_intent_id"].as_str().unwrap().to_string();
        let refund = |amount: &str| format!("/api/payments/refund/{}{}", intent, amount);

        // nothing captured yet
        let (status, _) = t.post(&refund(""), Some(ADMIN_TOKEN), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = t.post(&format!("/api/payments/confirm/{}", intent), Some(&buyer), json!({})).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = t.post(&refund("?amount_cents=1000"), Some(&buyer), json!({})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = t.post(&refund("?amount_cents=0"), Some(ADMIN_TOKEN), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = t.post(&refund("?amount_cents=1000"), Some(ADMIN_TOKEN), json!({})).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(payment_status(&t, &intent).await, ("partially_refunded".to_string(), 1000));

        let (status, _) = t.post(&refund("?amount_cents=4001"), Some(ADMIN_TOKEN), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // no amount refunds the remainder
        let (status, _) = t.post(&refund(""), Some(ADMIN_TOKEN), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payment_status(&t, &intent).await, ("refunded".to_string(), 5000));

        let (status, _) = t.post(&refund("?amount_cents=1"), Some(ADMIN_TOKEN), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, metrics) = t.get("/metrics", None).await;
        assert_eq!(metrics["refunds"], 2);
    }

    async fn order_intent(t: &TestApp, f: &Fixture) -> String {
        let (status, body) = t
            .post("/api/payments/create-intent", Some(&f.buyer), json!({ "amount_cents": 3000, "order_id": f.order_id }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["payment_intent_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_intent_survives_restart() {
        let t = setup().await;
        let f = fixture(&t).await;
        let intent = order_intent(&t, &f).await;

        let t = t.restarted();
        let (status, body) = t.post(&format!("/api/payments/confirm/{}", intent), Some(&f.buyer), json!({})).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(payment_status(&t, &intent).await.0, "succeeded");
        let (_, order) = t.get(&format!("/api/orders/{}", f.order_id), Some(&f.buyer)).await;
        assert_eq!(order["status"], "confirmed");

        let t = t.restarted();
        let (status, body) = t
            .post(&format!("/api/payments/refund/{}?amount_cents=500", intent), Some(ADMIN_TOKEN), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(payment_status(&t, &intent).await, ("partially_refunded".to_string(), 500));
    }

    #[tokio::test]
    async fn test_confirm_records_an_intent_the_gateway_already_settled() {
        let t = setup().await;
        let f = fixture(&t).await;
        let intent = order_intent(&t, &f).await;

        // gateway confirmed, but the local write never happened
        let settled = t.state.payments.confirm(&intent).await.unwrap();
        assert_eq!(settled.status.as_str(), "succeeded");
        assert_eq!(payment_status(&t, &intent).await.0, "requires_confirmation");

        let (status, body) = t.post(&format!("/api/payments/confirm/{}", intent), Some(&f.buyer), json!({})).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(payment_status(&t, &intent).await.0, "succeeded");
        let (_, order) = t.get(&format!("/api/orders/{}", f.order_id), Some(&f.buyer)).await;
        assert_eq!(order["status"], "confirmed");

        let (status, _) = t.post(&format!("/api/payments/confirm/{}", intent), Some(&f.buyer), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_refund_checks_the_gateway_amount() {
        let t = setup().await;
        let f = fixture(&t).await;
        let intent = order_intent(&t, &f).await;
        let (status, _) = t.post(&format!("/api/payments/confirm/{}", intent), Some(&f.buyer), json!({})).await;
        assert_eq!(status, StatusCode::OK);

        // a refund the gateway took while the local row missed it
        t.state.payments.refund(&intent, Some(2000)).await.unwrap();
        assert_eq!(payment_status(&t, &intent).await, ("succeeded".to_string(), 0));

        let (status, _) = t
            .post(&format!("/api/payments/refund/{}?amount_cents=1500", intent), Some(ADMIN_TOKEN), json!({}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = t.post(&format!("/api/payments/refund/{}", intent), Some(ADMIN_TOKEN), json!({})).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(payment_status(&t, &intent).await, ("refunded".to_string(), 3000));
    }
}
