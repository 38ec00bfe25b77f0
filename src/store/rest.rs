//! Adapter for a hosted PostgREST-style relational backend.
//!
//! Tables are reached at `{base}/rest/v1/{table}` and filtered with `eq.`
//! operators. Multi-row writes are sequences of conditional `PATCH`es; a
//! write that matches no rows is turned into `NotFound` or `Conflict`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{apply_load_delta, ResolveAssignment, Store, StoreError};
use crate::config::RestStoreConfig;
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::order::{Order, OrderItem, OrderStatus};
use crate::models::partner::{shift_time, Partner, PartnerStatus};

const ORDERS: &str = "orders";
const PARTNERS: &str = "partners";
const ASSIGNMENTS: &str = "assignments";
const NEWEST_FIRST: &str = "created_at.desc,id.asc";
const LOAD_UPDATE_ATTEMPTS: usize = 3;

pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(config: &RestStoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|err| StoreError::Unavailable(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{table}", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn writing(&self, method: Method, table: &str) -> RequestBuilder {
        self.request(method, table)
            .header("Prefer", "return=representation")
    }

    async fn rows<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<Vec<T>, StoreError> {
        let response = builder.send().await.map_err(map_send_error)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Unavailable(format!("store answered {status}: {body}")));
        }

        response
            .json::<Vec<T>>()
            .await
            .map_err(|err| StoreError::Malformed(format!("unexpected row shape: {err}")))
    }

    async fn first<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        entity: &'static str,
        id: Uuid,
    ) -> Result<T, StoreError> {
        self.rows::<T>(builder)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found(entity, id))
    }

    fn by_id(&self, method: Method, table: &str, id: Uuid) -> RequestBuilder {
        let builder = if method == Method::GET {
            self.request(method, table)
        } else {
            self.writing(method, table)
        };
        builder.query(&[("id", eq(id))])
    }

    async fn patch_order(&self, id: Uuid, filters: &[(&str, String)], body: Value) -> Result<Vec<OrderRow>, StoreError> {
        self.rows(self.by_id(Method::PATCH, ORDERS, id).query(filters).json(&body))
            .await
    }

    /// Why a conditional order write matched nothing.
    async fn order_mismatch(&self, id: Uuid, expected: OrderStatus) -> StoreError {
        match self.get_order(id).await {
            Ok(order) => StoreError::Conflict(format!(
                "order {id} is {} not {expected}",
                order.status
            )),
            Err(err) => err,
        }
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

fn map_send_error(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Unavailable(format!("store request failed: {err}"))
    }
}

fn order_status_patch(next: OrderStatus) -> Value {
    if next.holds_partner() {
        json!({ "status": next })
    } else {
        json!({ "status": next, "assigned_partner_id": null })
    }
}

#[async_trait]
impl Store for RestStore {
    fn backend(&self) -> &'static str {
        "rest"
    }

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        let rows: Vec<OrderRow> = self
            .rows(self.request(Method::GET, ORDERS).query(&[("order", NEWEST_FIRST)]))
            .await?;
        Ok(rows.into_iter().map(Order::from).collect())
    }

    async fn get_order(&self, id: Uuid) -> Result<Order, StoreError> {
        let row: OrderRow = self.first(self.by_id(Method::GET, ORDERS, id), "order", id).await?;
        Ok(row.into())
    }

    async fn insert_order(&self, order: Order) -> Result<Order, StoreError> {
        let id = order.id;
        let row: OrderRow = self
            .first(
                self.writing(Method::POST, ORDERS).json(&OrderRow::from(order)),
                "order",
                id,
            )
            .await?;
        Ok(row.into())
    }

    async fn update_order_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order, StoreError> {
        let rows = self
            .patch_order(id, &[("status", eq(expected))], order_status_patch(next))
            .await?;

        match rows.into_iter().next() {
            Some(row) => Ok(row.into()),
            None => Err(self.order_mismatch(id, expected).await),
        }
    }

    async fn list_partners(&self) -> Result<Vec<Partner>, StoreError> {
        let rows: Vec<PartnerRow> = self
            .rows(self.request(Method::GET, PARTNERS).query(&[("order", NEWEST_FIRST)]))
            .await?;
        Ok(rows.into_iter().map(Partner::from).collect())
    }

    async fn get_partner(&self, id: Uuid) -> Result<Partner, StoreError> {
        let row: PartnerRow = self
            .first(self.by_id(Method::GET, PARTNERS, id), "partner", id)
            .await?;
        Ok(row.into())
    }

    async fn insert_partner(&self, partner: Partner) -> Result<Partner, StoreError> {
        let id = partner.id;
        let row: PartnerRow = self
            .first(
                self.writing(Method::POST, PARTNERS).json(&PartnerRow::from(partner)),
                "partner",
                id,
            )
            .await?;
        Ok(row.into())
    }

    async fn update_partner(&self, partner: Partner) -> Result<Partner, StoreError> {
        let id = partner.id;
        let row: PartnerRow = self
            .first(
                self.by_id(Method::PATCH, PARTNERS, id)
                    .json(&PartnerPatch::from(partner)),
                "partner",
                id,
            )
            .await?;
        Ok(row.into())
    }

    async fn delete_partner(&self, id: Uuid) -> Result<(), StoreError> {
        let _: PartnerRow = self
            .first(self.by_id(Method::DELETE, PARTNERS, id), "partner", id)
            .await?;
        Ok(())
    }

    async fn adjust_partner_load(&self, id: Uuid, delta: i32) -> Result<u32, StoreError> {
        for attempt in 1..=LOAD_UPDATE_ATTEMPTS {
            let partner = self.get_partner(id).await?;
            let next = apply_load_delta(partner.current_load, delta);

            let rows: Vec<PartnerRow> = self
                .rows(
                    self.by_id(Method::PATCH, PARTNERS, id)
                        .query(&[("current_load", eq(partner.current_load))])
                        .json(&json!({ "current_load": next })),
                )
                .await?;

            if !rows.is_empty() {
                return Ok(next);
            }
            debug!(partner_id = %id, attempt, "partner load changed underneath update; retrying");
        }

        Err(StoreError::Conflict(format!(
            "partner {id} load kept changing during update"
        )))
    }

    async fn latest_assignment(&self, order_id: Uuid) -> Result<Option<Assignment>, StoreError> {
        let rows: Vec<AssignmentRow> = self
            .rows(self.request(Method::GET, ASSIGNMENTS).query(&[
                ("order_id", eq(order_id)),
                ("order", NEWEST_FIRST.to_string()),
                ("limit", "1".to_string()),
            ]))
            .await?;
        Ok(rows.into_iter().next().map(Assignment::from))
    }

    async fn list_assignments(
        &self,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<Assignment>, StoreError> {
        let mut builder = self
            .request(Method::GET, ASSIGNMENTS)
            .query(&[("order", NEWEST_FIRST)]);
        if let Some(status) = status {
            builder = builder.query(&[("status", eq(status.as_str()))]);
        }

        let rows: Vec<AssignmentRow> = self.rows(builder).await?;
        Ok(rows.into_iter().map(Assignment::from).collect())
    }

    async fn commit_assignment(&self, assignment: Assignment) -> Result<Order, StoreError> {
        let partner_id = assignment
            .partner_id
            .ok_or_else(|| StoreError::Conflict("assignment has no partner".to_string()))?;
        let order_id = assignment.order_id;

        let partner = self.get_partner(partner_id).await?;
        if !partner.is_active() {
            return Err(StoreError::Conflict(format!(
                "partner {partner_id} is {}",
                partner.status.as_str()
            )));
        }
        if !partner.has_capacity() {
            return Err(StoreError::Conflict(format!(
                "partner {partner_id} is at capacity ({} open deliveries)",
                partner.current_load
            )));
        }

        // Reserve capacity first so two commits cannot both take the last slot.
        let reserved: Vec<PartnerRow> = self
            .rows(
                self.by_id(Method::PATCH, PARTNERS, partner_id)
                    .query(&[
                        ("current_load", eq(partner.current_load)),
                        ("status", eq(PartnerStatus::Active.as_str())),
                    ])
                    .json(&json!({ "current_load": partner.current_load + 1 })),
            )
            .await?;
        if reserved.is_empty() {
            return Err(StoreError::Conflict(format!(
                "partner {partner_id} changed while assigning"
            )));
        }

        let linked = self
            .patch_order(
                order_id,
                &[("status", eq(OrderStatus::Pending))],
                json!({ "status": OrderStatus::Assigned, "assigned_partner_id": partner_id }),
            )
            .await;

        let order = match linked.map(|rows| rows.into_iter().next()) {
            Ok(Some(row)) => Order::from(row),
            Ok(None) => {
                self.release_load(partner_id).await;
                return Err(self.order_mismatch(order_id, OrderStatus::Pending).await);
            }
            Err(err) => {
                self.release_load(partner_id).await;
                return Err(err);
            }
        };

        let inserted: Result<Vec<AssignmentRow>, StoreError> = self
            .rows(
                self.writing(Method::POST, ASSIGNMENTS)
                    .json(&AssignmentRow::from(assignment)),
            )
            .await;

        if let Err(err) = inserted {
            warn!(order_id = %order_id, partner_id = %partner_id, error = %err, "assignment insert failed; undoing order link");
            if let Err(undo) = self
                .patch_order(order_id, &[], order_status_patch(OrderStatus::Pending))
                .await
            {
                warn!(order_id = %order_id, error = %undo, "failed to unlink order after insert failure");
            }
            self.release_load(partner_id).await;
            return Err(err);
        }

        Ok(order)
    }

    async fn resolve_assignment(&self, resolve: ResolveAssignment) -> Result<Order, StoreError> {
        let settled: Vec<AssignmentRow> = self
            .rows(
                self.by_id(Method::PATCH, ASSIGNMENTS, resolve.assignment_id)
                    .query(&[
                        ("order_id", eq(resolve.order_id)),
                        ("status", eq(AssignmentStatus::Active.as_str())),
                    ])
                    .json(&json!({
                        "status": resolve.outcome,
                        "failure_reason": resolve.reason,
                    })),
            )
            .await?;

        let partner_id = match settled.into_iter().next() {
            Some(row) => row.partner_id,
            None => self.interrupted_resolution(&resolve).await?,
        };

        // The order only moves while it still holds the attempt's partner.
        let mut filters = vec![(
            "status",
            format!(
                "in.({},{})",
                OrderStatus::Assigned.as_str(),
                OrderStatus::Picked.as_str()
            ),
        )];
        if let Some(partner_id) = partner_id {
            filters.push(("assigned_partner_id", eq(partner_id)));
        }

        let rows = self
            .patch_order(resolve.order_id, &filters, order_status_patch(resolve.order_status))
            .await?;
        match rows.into_iter().next() {
            Some(row) => Ok(row.into()),
            None => Err(match self.get_order(resolve.order_id).await {
                Ok(order) => StoreError::Conflict(format!(
                    "order {} is {} and no longer held by this assignment",
                    order.id, order.status
                )),
                Err(err) => err,
            }),
        }
    }
}

impl RestStore {
    /// An attempt that is no longer active may still have an order pointing
    /// at its partner, when an earlier resolve settled the attempt but failed
    /// on the order write. That resolve is finished here; anything else is a
    /// conflict.
    async fn interrupted_resolution(
        &self,
        resolve: &ResolveAssignment,
    ) -> Result<Option<Uuid>, StoreError> {
        let row = self
            .rows::<AssignmentRow>(self.by_id(Method::GET, ASSIGNMENTS, resolve.assignment_id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found("assignment", resolve.assignment_id))?;
        let already = StoreError::Conflict(format!(
            "assignment {} is already {}",
            row.id,
            row.status.as_str()
        ));

        let Some(partner_id) = row.partner_id else {
            return Err(already);
        };
        if row.order_id != resolve.order_id || row.status != resolve.outcome {
            return Err(already);
        }

        let order = self.get_order(resolve.order_id).await?;
        let holds_partner = matches!(order.status, OrderStatus::Assigned | OrderStatus::Picked)
            && order.assigned_partner_id == Some(partner_id);
        if !holds_partner {
            return Err(already);
        }

        warn!(
            order_id = %resolve.order_id,
            assignment_id = %row.id,
            "finishing an interrupted assignment resolution"
        );
        Ok(Some(partner_id))
    }

    async fn release_load(&self, partner_id: Uuid) {
        if let Err(err) = self.adjust_partner_load(partner_id, -1).await {
            warn!(partner_id = %partner_id, error = %err, "failed to release reserved partner load");
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderRow {
    id: Uuid,
    customer_name: String,
    customer_phone: String,
    items: Vec<OrderItem>,
    area: String,
    address: String,
    value: f64,
    status: OrderStatus,
    assigned_partner_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<Order> for OrderRow {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            customer_name: order.customer_name,
            customer_phone: order.customer_phone,
            items: order.items,
            area: order.area,
            address: order.address,
            value: order.value,
            status: order.status,
            assigned_partner_id: order.assigned_partner_id,
            created_at: order.created_at,
        }
    }
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            id: row.id,
            customer_name: row.customer_name,
            customer_phone: row.customer_phone,
            items: row.items,
            area: row.area,
            address: row.address,
            value: row.value,
            status: row.status,
            assigned_partner_id: row.assigned_partner_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PartnerRow {
    id: Uuid,
    name: String,
    phone: String,
    email: Option<String>,
    status: PartnerStatus,
    assigned_areas: Vec<String>,
    #[serde(with = "shift_time")]
    shift_start: NaiveTime,
    #[serde(with = "shift_time")]
    shift_end: NaiveTime,
    current_load: u32,
    rating: f32,
    created_at: DateTime<Utc>,
}

impl From<Partner> for PartnerRow {
    fn from(partner: Partner) -> Self {
        Self {
            id: partner.id,
            name: partner.name,
            phone: partner.phone,
            email: partner.email,
            status: partner.status,
            assigned_areas: partner.assigned_areas,
            shift_start: partner.shift_start,
            shift_end: partner.shift_end,
            current_load: partner.current_load,
            rating: partner.rating,
            created_at: partner.created_at,
        }
    }
}

impl From<PartnerRow> for Partner {
    fn from(row: PartnerRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            phone: row.phone,
            email: row.email,
            status: row.status,
            assigned_areas: row.assigned_areas,
            shift_start: row.shift_start,
            shift_end: row.shift_end,
            current_load: row.current_load,
            rating: row.rating,
            created_at: row.created_at,
        }
    }
}

/// Editable partner columns; load and creation time stay server-side.
#[derive(Debug, Serialize)]
struct PartnerPatch {
    name: String,
    phone: String,
    email: Option<String>,
    status: PartnerStatus,
    assigned_areas: Vec<String>,
    #[serde(with = "shift_time")]
    shift_start: NaiveTime,
    #[serde(with = "shift_time")]
    shift_end: NaiveTime,
    rating: f32,
}

impl From<Partner> for PartnerPatch {
    fn from(partner: Partner) -> Self {
        Self {
            name: partner.name,
            phone: partner.phone,
            email: partner.email,
            status: partner.status,
            assigned_areas: partner.assigned_areas,
            shift_start: partner.shift_start,
            shift_end: partner.shift_end,
            rating: partner.rating,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssignmentRow {
    id: Uuid,
    order_id: Uuid,
    partner_id: Option<Uuid>,
    status: AssignmentStatus,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<Assignment> for AssignmentRow {
    fn from(assignment: Assignment) -> Self {
        Self {
            id: assignment.id,
            order_id: assignment.order_id,
            partner_id: assignment.partner_id,
            status: assignment.status,
            failure_reason: assignment.failure_reason,
            created_at: assignment.created_at,
        }
    }
}

impl From<AssignmentRow> for Assignment {
    fn from(row: AssignmentRow) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            partner_id: row.partner_id,
            status: row.status,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
        }
    }
}
