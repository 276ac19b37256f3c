use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};
use tower::ServiceExt;

use docflow::{
    api::AppState,
    config::Config,
    database::Database,
    error::{AppError, Result},
    membership::{PaymentGateway, PaymentNotification, PaymentStatus},
    server::{create_router, create_state, create_worker},
};

/// Gateway answering from a fixed set of payments
#[derive(Default)]
struct FakeGateway {
    payments: HashMap<String, PaymentNotification>,
}

impl FakeGateway {
    fn with(mut self, transaction_id: &str, amount: i64, status: PaymentStatus) -> Self {
        self.payments.insert(
            transaction_id.to_string(),
            PaymentNotification {
                transaction_id: transaction_id.to_string(),
                amount,
                status,
                meta: json!({ "id": transaction_id, "method": "card" }),
            },
        );
        self
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn fetch_payment(&self, transaction_id: &str) -> Result<PaymentNotification> {
        self.payments
            .get(transaction_id)
            .cloned()
            .ok_or(AppError::NotFound("payment"))
    }
}

struct TestContext {
    app: Router,
    state: AppState,
    config: Config,
}

const OPERATOR_TOKEN: &str = "operator-secret";

async fn setup_test(gateway: FakeGateway) -> TestContext {
    let mut config = Config::default();
    config.server.operator_token = Some(OPERATOR_TOKEN.to_string());
    let db = Database::in_memory().await.unwrap();
    let state = create_state(&db, &config, Arc::new(gateway)).await.unwrap();
    TestContext {
        app: create_router(state.clone()),
        state,
        config,
    }
}

impl TestContext {
    async fn send(&self, method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let headers: Vec<(&str, &str)> = user.map(|user| ("x-user-id", user)).into_iter().collect();
        self.send_with(method, uri, &headers, body).await
    }

    async fn send_with(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn post(&self, uri: &str, user: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(user), Some(body)).await
    }

    async fn get(&self, uri: &str, user: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, Some(user), None).await
    }

    /// Plan catalog writes go through the operator token
    async fn operator(&self, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send_with(method, uri, &[("x-operator-token", OPERATOR_TOKEN)], Some(body)).await
    }

    /// Drain the job queue the way the background scheduler would
    async fn run_jobs(&self) {
        create_worker(&self.state, &self.config.jobs).run_once().await.unwrap();
    }

    /// Create an organisation with one user, returning `(organisation_id, user_id)`
    async fn organisation(&self, name: &str, email: &str) -> (String, String) {
        let (status, organisation) = self
            .send(Method::POST, "/api/organisations", None, Some(json!({ "name": name })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let organisation_id = organisation["id"].as_str().unwrap().to_string();
        let user_id = self.user(&organisation_id, email).await;
        (organisation_id, user_id)
    }

    async fn user(&self, organisation_id: &str, email: &str) -> String {
        let (status, user) = self
            .send(
                Method::POST,
                "/api/users",
                None,
                Some(json!({ "name": email, "email": email, "organisation_id": organisation_id })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        user["id"].as_str().unwrap().to_string()
    }
}

fn id(value: &Value) -> String {
    value["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_check_needs_no_user() {
    let ctx = setup_test(FakeGateway::default()).await;
    let (status, _) = ctx.send(Method::GET, "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn requests_without_a_known_user_are_rejected() {
    let ctx = setup_test(FakeGateway::default()).await;

    let (status, body) = ctx.send(Method::GET, "/api/flows", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");

    let (status, _) = ctx.get("/api/flows", "no-such-user").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn document_moves_through_an_approval() {
    let ctx = setup_test(FakeGateway::default()).await;
    let (organisation_id, writer) = ctx.organisation("Acme", "writer@acme.test").await;
    let approver = ctx.user(&organisation_id, "approver@acme.test").await;

    let (status, flow) = ctx
        .post("/api/flows", &writer, json!({ "name": "Invoices", "controlled": true }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let flow_id = id(&flow);

    // Default states are seeded by the background job
    ctx.run_jobs().await;
    let (status, flow) = ctx.get(&format!("/api/flows/{}", flow_id), &writer).await;
    assert_eq!(status, StatusCode::OK);
    let states = flow["states"].as_array().unwrap().clone();
    let names: Vec<&str> = states.iter().map(|s| s["state"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Draft", "Review", "Publish"]);
    let (draft, review, publish) = (id(&states[0]), id(&states[1]), id(&states[2]));

    let (status, content_type) = ctx
        .post(
            "/api/content-types",
            &writer,
            json!({ "name": "Invoice", "prefix": "INV", "flow_id": flow_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let contents_uri = format!("/api/content-types/{}/contents", id(&content_type));

    let (status, first) = ctx.post(&contents_uri, &writer, json!({ "serialized": { "total": 120 } })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["instance_id"], "INV0001");
    assert_eq!(first["state_id"], draft.as_str());
    let (_, second) = ctx.post(&contents_uri, &writer, json!({})).await;
    assert_eq!(second["instance_id"], "INV0002");

    let (status, system) = ctx
        .post(
            "/api/approval-systems",
            &writer,
            json!({
                "instance_id": id(&first),
                "pre_state_id": draft,
                "post_state_id": review,
                "approver_id": approver,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(system["status"], "pending");
    let approve_uri = format!("/api/approval-systems/{}/approve", id(&system));

    let (status, body) = ctx.post(&approve_uri, &writer, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "invalid_user");

    let (status, approval) = ctx.post(&approve_uri, &approver, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approval["instance"]["state_id"], review.as_str());
    assert_eq!(approval["approval_system"]["approved"], true);

    let (status, body) = ctx.post(&approve_uri, &approver, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_approved");

    // The second document is still in Draft, so a Review -> Publish gate can't fire
    let (_, gate) = ctx
        .post(
            "/api/approval-systems",
            &writer,
            json!({
                "instance_id": id(&second),
                "pre_state_id": review,
                "post_state_id": publish,
                "approver_id": approver,
            }),
        )
        .await;
    let (status, body) = ctx
        .post(&format!("/api/approval-systems/{}/approve", id(&gate)), &approver, json!({}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "unprocessible_state");

    let (_, stored) = ctx.get(&format!("/api/contents/{}", id(&second)), &writer).await;
    assert_eq!(stored["state_id"], draft.as_str());

    let (status, pending) = ctx.get("/api/approval-systems?pending=true", &approver).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn states_can_be_inserted_and_shifted() {
    let ctx = setup_test(FakeGateway::default()).await;
    let (_, writer) = ctx.organisation("Acme", "writer@acme.test").await;

    let (_, flow) = ctx.post("/api/flows", &writer, json!({ "name": "Contracts" })).await;
    ctx.run_jobs().await;
    let states_uri = format!("/api/flows/{}/states", id(&flow));

    let (status, legal) = ctx.post(&states_uri, &writer, json!({ "state": "Legal", "order": 2 })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(legal["order"], 2);

    // Opening a gap after Draft moves every later state up
    let draft = id(&ctx.get(&states_uri, &writer).await.1[0]);
    let shuffle_uri = format!("/api/states/{}/shuffle", draft);
    let (status, shifted) = ctx.post(&shuffle_uri, &writer, json!({ "additive": 2 })).await;
    assert_eq!(status, StatusCode::OK);
    let orders: Vec<(&str, i64)> = shifted
        .as_array()
        .unwrap()
        .iter()
        .map(|s| (s["state"].as_str().unwrap(), s["order"].as_i64().unwrap()))
        .collect();
    assert_eq!(orders, vec![("Draft", 1), ("Legal", 4), ("Publish", 5)]);

    let (status, body) = ctx.post(&shuffle_uri, &writer, json!({ "additive": -3 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_failed");

    let (status, body) = ctx.post(&states_uri, &writer, json!({ "state": "Far", "order": 9 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_failed");
}

#[tokio::test]
async fn other_organisations_cannot_see_each_others_flows() {
    let ctx = setup_test(FakeGateway::default()).await;
    let (_, writer) = ctx.organisation("Acme", "writer@acme.test").await;
    let (_, outsider) = ctx.organisation("Globex", "someone@globex.test").await;

    let (_, flow) = ctx.post("/api/flows", &writer, json!({ "name": "Private" })).await;

    let (status, body) = ctx.get(&format!("/api/flows/{}", id(&flow)), &outsider).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (_, flows) = ctx.get("/api/flows", &outsider).await;
    assert!(flows.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn payments_move_memberships_between_plans() {
    let gateway = FakeGateway::default()
        .with("pay_upgrade", 20000, PaymentStatus::Captured)
        .with("pay_odd", 1234, PaymentStatus::Captured)
        .with("pay_declined", 2000, PaymentStatus::Failed);
    let ctx = setup_test(gateway).await;
    let (organisation_id, owner) = ctx.organisation("Acme", "owner@acme.test").await;

    let (status, basic) = ctx
        .operator(
            Method::POST,
            "/api/plans",
            json!({ "name": "Basic", "monthly_amount": 1000, "yearly_amount": 10000 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, pro) = ctx
        .operator(
            Method::POST,
            "/api/plans",
            json!({ "name": "Pro", "monthly_amount": 2000, "yearly_amount": 20000 }),
        )
        .await;

    let (status, plans) = ctx.send(Method::GET, "/api/plans", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plans.as_array().unwrap().len(), 2);

    let (status, membership) = ctx.post("/api/memberships", &owner, json!({ "plan_id": id(&basic) })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(membership["organisation_id"], organisation_id.as_str());
    let payments_uri = format!("/api/memberships/{}/payments", id(&membership));

    let (status, body) = ctx
        .post(&payments_uri, &owner, json!({ "transaction_id": "pay_odd", "plan_id": id(&pro) }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "wrong_amount");

    let (status, outcome) = ctx
        .post(&payments_uri, &owner, json!({ "transaction_id": "pay_declined", "plan_id": id(&pro) }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "failed");
    assert_eq!(outcome["payment"]["status"], "failed");

    let (status, outcome) = ctx
        .post(&payments_uri, &owner, json!({ "transaction_id": "pay_upgrade", "plan_id": id(&pro) }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "applied");
    assert_eq!(outcome["membership"]["plan_id"], id(&pro).as_str());
    assert_eq!(outcome["membership"]["plan_duration"], 365);
    assert_eq!(outcome["payment"]["action"], "upgrade");
    let payment_id = id(&outcome["payment"]);

    // The gateway payment can't be applied twice
    let (status, body) = ctx
        .post(&payments_uri, &owner, json!({ "transaction_id": "pay_upgrade", "plan_id": id(&pro) }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    ctx.run_jobs().await;
    let (status, payment) = ctx.get(&format!("/api/payments/{}", payment_id), &owner).await;
    assert_eq!(status, StatusCode::OK);
    assert!(payment["invoice_number"].as_str().unwrap().starts_with("INV-"));

    let (_, payments) = ctx.get(&payments_uri, &owner).await;
    assert_eq!(payments.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn tenants_cannot_reprice_the_shared_plan_catalog() {
    let gateway = FakeGateway::default().with("pay_cheap", 1, PaymentStatus::Captured);
    let ctx = setup_test(gateway).await;
    let (_, acme) = ctx.organisation("Acme", "owner@acme.test").await;
    let (_, globex) = ctx.organisation("Globex", "owner@globex.test").await;

    let (status, body) = ctx
        .post("/api/plans", &globex, json!({ "name": "Free", "monthly_amount": 1, "yearly_amount": 2 }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (_, pro) = ctx
        .operator(
            Method::POST,
            "/api/plans",
            json!({ "name": "Pro", "monthly_amount": 2000, "yearly_amount": 20000 }),
        )
        .await;
    let plan_uri = format!("/api/plans/{}", id(&pro));

    let (status, body) = ctx
        .send(Method::PUT, &plan_uri, Some(globex.as_str()), Some(json!({ "yearly_amount": 1 })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, body) = ctx
        .send_with(
            Method::PUT,
            &plan_uri,
            &[("x-user-id", globex.as_str()), ("x-operator-token", "guess")],
            Some(json!({ "yearly_amount": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (_, plan) = ctx.send(Method::GET, &plan_uri, None, None).await;
    assert_eq!(plan["yearly_amount"], 20000);

    // A one-unit payment still doesn't buy a year
    let (_, membership) = ctx.post("/api/memberships", &acme, json!({ "plan_id": id(&pro) })).await;
    let (status, body) = ctx
        .post(
            &format!("/api/memberships/{}/payments", id(&membership)),
            &acme,
            json!({ "transaction_id": "pay_cheap", "plan_id": id(&pro) }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "wrong_amount");

    let (status, plan) = ctx.operator(Method::PUT, &plan_uri, json!({ "yearly_amount": 24000 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plan["yearly_amount"], 24000);
}

#[tokio::test]
async fn other_organisations_cannot_see_each_others_jobs() {
    let ctx = setup_test(FakeGateway::default()).await;
    let (_, writer) = ctx.organisation("Acme", "writer@acme.test").await;
    let (_, outsider) = ctx.organisation("Globex", "owner@globex.test").await;
    ctx.post("/api/flows", &writer, json!({ "name": "Main" })).await;

    let (_, jobs) = ctx.get("/api/jobs", &writer).await;
    assert_eq!(jobs.as_array().unwrap().len(), 1);
    let job_id = id(&jobs[0]);

    let (status, jobs) = ctx.get("/api/jobs", &outsider).await;
    assert_eq!(status, StatusCode::OK);
    assert!(jobs.as_array().unwrap().is_empty());

    let (status, body) = ctx.get(&format!("/api/jobs/{}", job_id), &outsider).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, job) = ctx.get(&format!("/api/jobs/{}", job_id), &writer).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["kind"], "seed_default_states");
}

#[tokio::test]
async fn job_list_filters_by_status() {
    let ctx = setup_test(FakeGateway::default()).await;
    let (_, writer) = ctx.organisation("Acme", "writer@acme.test").await;
    ctx.post("/api/flows", &writer, json!({ "name": "Main" })).await;

    let (_, pending) = ctx.get("/api/jobs?status=pending", &writer).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["kind"], "seed_default_states");

    ctx.run_jobs().await;
    let (_, completed) = ctx.get("/api/jobs?status=completed", &writer).await;
    assert_eq!(completed.as_array().unwrap().len(), 1);

    let (status, body) = ctx.get("/api/jobs?status=bogus", &writer).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_failed");
}
