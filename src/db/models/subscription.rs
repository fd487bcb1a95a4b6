use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{query_as, SqlitePool};
use uuid::Uuid;

use crate::db;
use crate::db::models::newspaper::Price;
use crate::delivery::GeoPoint;
use crate::error::{on_unique_violation, AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Monthly,
    Quarterly,
    Yearly,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Monthly => "monthly",
            Plan::Quarterly => "quarterly",
            Plan::Yearly => "yearly",
        }
    }

    pub fn parse(s: &str) -> Option<Plan> {
        match s {
            "monthly" => Some(Plan::Monthly),
            "quarterly" => Some(Plan::Quarterly),
            "yearly" => Some(Plan::Yearly),
            _ => None,
        }
    }

    fn months(&self) -> u32 {
        match self {
            Plan::Monthly => 1,
            Plan::Quarterly => 3,
            Plan::Yearly => 12,
        }
    }

    /// Calendar arithmetic; a day past the end of the target month clamps to its last day
    /// (Jan 31 + 1 month = Feb 28/29).
    pub fn end_date(&self, start: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
        start
            .checked_add_months(Months::new(self.months()))
            .ok_or_else(|| AppError::Internal("Subscription end date out of range".to_string()))
    }

    pub fn price(&self, price: &Price) -> f64 {
        match self {
            Plan::Monthly => price.monthly,
            Plan::Quarterly => price.quarterly,
            Plan::Yearly => price.yearly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    PendingPayment,
    Active,
    Expired,
    Cancelled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::PendingPayment => "pending_payment",
            Status::Active => "active",
            Status::Expired => "expired",
            Status::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "pending_payment" => Some(Status::PendingPayment),
            "active" => Some(Status::Active),
            "expired" => Some(Status::Expired),
            "cancelled" => Some(Status::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub location: Option<GeoPoint>,
}

/// Subscription joined with its customer, newspaper and distributor.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubscriptionRecord {
    pub id: String,
    pub user_id: String,
    pub newspaper_id: String,
    pub subscription_type: String,
    pub start_date: String,
    pub end_date: String,
    pub status: String,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub location_address: Option<String>,
    pub delivery_time: String,
    pub distributor_id: Option<String>,
    pub payment_order_id: Option<String>,
    pub payment_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub user_name: String,
    pub user_email: String,
    pub user_phone: String,
    pub newspaper_name: String,
    pub newspaper_description: String,
    pub price_monthly: f64,
    pub price_quarterly: f64,
    pub price_yearly: f64,
    pub distributor_name: Option<String>,
    pub distributor_phone: Option<String>,
}

const SELECT_POPULATED: &str = "
    SELECT s.*,
           u.name  AS user_name,
           u.email AS user_email,
           u.phone AS user_phone,
           n.name  AS newspaper_name,
           n.description AS newspaper_description,
           n.price_monthly, n.price_quarterly, n.price_yearly,
           d.name  AS distributor_name,
           d.phone AS distributor_phone
    FROM subscriptions s
    JOIN users u ON u.id = s.user_id
    JOIN newspapers n ON n.id = s.newspaper_id
    LEFT JOIN users d ON d.id = s.distributor_id";

#[derive(Debug, Serialize)]
pub struct UserRef {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct NewspaperRef {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: Price,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(rename = "_id")]
    pub id: String,
    pub user: UserRef,
    pub newspaper: NewspaperRef,
    pub subscription_type: String,
    pub start_date: String,
    pub end_date: String,
    pub status: String,
    pub delivery_address: DeliveryAddress,
    pub delivery_time: String,
    pub distributor: Option<UserRef>,
    pub payment_order_id: Option<String>,
    pub payment: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SubscriptionRecord {
    pub fn plan(&self) -> Plan {
        Plan::parse(&self.subscription_type).unwrap_or(Plan::Monthly)
    }

    pub fn price(&self) -> Price {
        Price {
            monthly: self.price_monthly,
            quarterly: self.price_quarterly,
            yearly: self.price_yearly,
        }
    }

    /// Amount owed for the subscription's plan, in major currency units.
    pub fn amount_due(&self) -> f64 {
        self.plan().price(&self.price())
    }

    pub fn delivery_address(&self) -> DeliveryAddress {
        let location = match (self.longitude, self.latitude) {
            (Some(lng), Some(lat)) => Some(GeoPoint {
                address: self.location_address.clone(),
                ..GeoPoint::new(lng, lat)
            }),
            _ => None,
        };
        DeliveryAddress {
            street: self.street.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            pincode: self.pincode.clone(),
            location,
        }
    }

    /// One-line address for notifications.
    pub fn address_line(&self) -> String {
        if let Some(addr) = self.location_address.as_deref().filter(|a| !a.trim().is_empty()) {
            return addr.to_string();
        }
        [&self.street, &self.city, &self.state, &self.pincode]
            .iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn to_view(&self) -> Subscription {
        Subscription {
            id: self.id.clone(),
            user: UserRef {
                id: self.user_id.clone(),
                name: self.user_name.clone(),
                email: Some(self.user_email.clone()),
                phone: self.user_phone.clone(),
            },
            newspaper: NewspaperRef {
                id: self.newspaper_id.clone(),
                name: self.newspaper_name.clone(),
                description: self.newspaper_description.clone(),
                price: self.price(),
            },
            subscription_type: self.subscription_type.clone(),
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
            status: self.status.clone(),
            delivery_address: self.delivery_address(),
            delivery_time: self.delivery_time.clone(),
            distributor: match (&self.distributor_id, &self.distributor_name, &self.distributor_phone) {
                (Some(id), Some(name), Some(phone)) => Some(UserRef {
                    id: id.clone(),
                    name: name.clone(),
                    email: None,
                    phone: phone.clone(),
                }),
                _ => None,
            },
            payment_order_id: self.payment_order_id.clone(),
            payment: self.payment_id.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }
}

pub struct NewSubscription {
    pub user_id: String,
    pub newspaper_id: String,
    pub plan: Plan,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub delivery_address: DeliveryAddress,
    pub delivery_time: String,
    pub distributor_id: String,
}

/// Which subscriptions a caller may list.
#[derive(Debug, Clone)]
pub enum Scope {
    All,
    Customer(String),
    Distributor(String),
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStats {
    pub newspaper: String,
    pub n_subscriptions: i64,
    /// Milliseconds.
    pub avg_duration: f64,
    pub min_duration: i64,
    pub max_duration: i64,
}

fn split_address(addr: &DeliveryAddress) -> (Option<f64>, Option<f64>, Option<String>) {
    match &addr.location {
        Some(p) => (Some(p.longitude()), Some(p.latitude()), p.address.clone()),
        None => (None, None, None),
    }
}

pub struct SubscriptionRepository;

impl SubscriptionRepository {
    pub async fn get(pool: &SqlitePool, id: &str) -> AppResult<Option<SubscriptionRecord>> {
        let sql = format!("{} WHERE s.id = ?", SELECT_POPULATED);
        let row = query_as::<_, SubscriptionRecord>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    pub async fn find_by_order(pool: &SqlitePool, order_id: &str) -> AppResult<Option<SubscriptionRecord>> {
        let sql = format!("{} WHERE s.payment_order_id = ?", SELECT_POPULATED);
        let row = query_as::<_, SubscriptionRecord>(&sql)
            .bind(order_id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    pub async fn list(pool: &SqlitePool, scope: &Scope) -> AppResult<Vec<SubscriptionRecord>> {
        let rows = match scope {
            Scope::All => {
                let sql = format!("{} ORDER BY s.created_at DESC", SELECT_POPULATED);
                query_as::<_, SubscriptionRecord>(&sql).fetch_all(pool).await?
            }
            Scope::Customer(id) => {
                let sql = format!("{} WHERE s.user_id = ? ORDER BY s.created_at DESC", SELECT_POPULATED);
                query_as::<_, SubscriptionRecord>(&sql).bind(id).fetch_all(pool).await?
            }
            Scope::Distributor(id) => {
                let sql = format!(
                    "{} WHERE s.distributor_id = ? ORDER BY s.created_at DESC",
                    SELECT_POPULATED
                );
                query_as::<_, SubscriptionRecord>(&sql).bind(id).fetch_all(pool).await?
            }
        };
        Ok(rows)
    }

    /// Active deliveries assigned to a distributor, grouped by area.
    pub async fn distribution_list(pool: &SqlitePool, distributor_id: &str) -> AppResult<Vec<SubscriptionRecord>> {
        let sql = format!(
            "{} WHERE s.distributor_id = ? AND s.status = 'active'
             ORDER BY s.pincode ASC, s.delivery_time ASC",
            SELECT_POPULATED
        );
        let rows = query_as::<_, SubscriptionRecord>(&sql)
            .bind(distributor_id)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    pub async fn create(pool: &SqlitePool, new: NewSubscription) -> AppResult<String> {
        let id = Uuid::new_v4().to_string();
        let now = db::now();
        let (lng, lat, location_address) = split_address(&new.delivery_address);
        let addr = &new.delivery_address;

        sqlx::query(
            "INSERT INTO subscriptions
                (id, user_id, newspaper_id, subscription_type, start_date, end_date, status,
                 street, city, state, pincode, longitude, latitude, location_address,
                 delivery_time, distributor_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending_payment', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.user_id)
        .bind(&new.newspaper_id)
        .bind(new.plan.as_str())
        .bind(db::timestamp(new.start_date))
        .bind(db::timestamp(new.end_date))
        .bind(&addr.street)
        .bind(&addr.city)
        .bind(&addr.state)
        .bind(&addr.pincode)
        .bind(lng)
        .bind(lat)
        .bind(&location_address)
        .bind(new.delivery_time.trim())
        .bind(&new.distributor_id)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await?;

        Ok(id)
    }

    /// Write the editable fields back in one statement.
    pub async fn update_delivery(
        pool: &SqlitePool,
        id: &str,
        address: &DeliveryAddress,
        delivery_time: &str,
        status: Status,
        distributor_id: Option<&str>,
    ) -> AppResult<()> {
        let (lng, lat, location_address) = split_address(address);
        sqlx::query(
            "UPDATE subscriptions
             SET street = ?, city = ?, state = ?, pincode = ?,
                 longitude = ?, latitude = ?, location_address = ?,
                 delivery_time = ?, status = ?, distributor_id = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&address.street)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.pincode)
        .bind(lng)
        .bind(lat)
        .bind(&location_address)
        .bind(delivery_time.trim())
        .bind(status.as_str())
        .bind(distributor_id)
        .bind(db::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_status(pool: &SqlitePool, id: &str, status: Status) -> AppResult<()> {
        sqlx::query("UPDATE subscriptions SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(db::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_order(pool: &SqlitePool, id: &str, order_id: &str) -> AppResult<()> {
        sqlx::query("UPDATE subscriptions SET payment_order_id = ?, updated_at = ? WHERE id = ?")
            .bind(order_id)
            .bind(db::now())
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| on_unique_violation(e, "Payment order is already attached to another subscription"))?;
        Ok(())
    }

    pub async fn stats(pool: &SqlitePool) -> AppResult<Vec<SubscriptionStats>> {
        let rows = query_as::<_, SubscriptionStats>(
            "SELECT n.name AS newspaper,
                    COUNT(*) AS n_subscriptions,
                    AVG(s.duration) AS avg_duration,
                    CAST(ROUND(MIN(s.duration)) AS INTEGER) AS min_duration,
                    CAST(ROUND(MAX(s.duration)) AS INTEGER) AS max_duration
             FROM (
                 SELECT newspaper_id,
                        (julianday(end_date) - julianday(start_date)) * 86400000.0 AS duration
                 FROM subscriptions
                 WHERE status != 'cancelled'
             ) s
             JOIN newspapers n ON n.id = s.newspaper_id
             GROUP BY s.newspaper_id, n.name
             ORDER BY n_subscriptions DESC, n.name ASC",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}
