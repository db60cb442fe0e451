use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;
use validator::Validate;

use super::checkout_service::ShippingInfo;
use crate::{
    entities::{profile_shipping_address, ProfileShippingAddress, ProfileShippingAddressModel},
    errors::ServiceError,
};

impl From<ProfileShippingAddressModel> for ShippingInfo {
    fn from(saved: ProfileShippingAddressModel) -> Self {
        Self {
            full_name: saved.full_name,
            email: saved.email,
            phone_number: saved.phone_number,
            address1: saved.address1,
            address2: saved.address2,
            city: saved.city,
            state: saved.state,
            zipcode: saved.zipcode,
            country: saved.country,
        }
    }
}

/// Account-level default shipping address used to prefill checkout
#[derive(Clone)]
pub struct ProfileService {
    db: Arc<DatabaseConnection>,
}

impl ProfileService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn shipping_address(
        &self,
        user_id: Uuid,
    ) -> Result<Option<ShippingInfo>, ServiceError> {
        Ok(Self::find(&*self.db, user_id).await?.map(ShippingInfo::from))
    }

    /// Validates and stores `shipping` as the account's address.
    #[instrument(skip(self, shipping))]
    pub async fn save_shipping_address(
        &self,
        user_id: Uuid,
        shipping: &ShippingInfo,
    ) -> Result<ShippingInfo, ServiceError> {
        shipping.validate()?;
        let saved = Self::upsert(&*self.db, user_id, shipping).await?;
        Ok(saved.into())
    }

    async fn find<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<Option<ProfileShippingAddressModel>, ServiceError> {
        Ok(ProfileShippingAddress::find()
            .filter(profile_shipping_address::Column::UserId.eq(user_id))
            .one(conn)
            .await?)
    }

    /// Inserts or overwrites the single address row of `user_id`.
    pub async fn upsert<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        shipping: &ShippingInfo,
    ) -> Result<ProfileShippingAddressModel, ServiceError> {
        let now = Utc::now();
        let (mut active, is_new): (profile_shipping_address::ActiveModel, bool) =
            match Self::find(conn, user_id).await? {
                Some(existing) => (existing.into(), false),
                None => (
                    profile_shipping_address::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        user_id: Set(user_id),
                        created_at: Set(now),
                        ..Default::default()
                    },
                    true,
                ),
            };
        active.full_name = Set(shipping.full_name.trim().to_string());
        active.email = Set(shipping.email.trim().to_string());
        active.phone_number = Set(shipping.phone_number.trim().to_string());
        active.address1 = Set(shipping.address1.trim().to_string());
        active.address2 = Set(shipping.address2.trim().to_string());
        active.city = Set(shipping.city.trim().to_string());
        active.state = Set(shipping.state.trim().to_string());
        active.zipcode = Set(shipping.zipcode.trim().to_string());
        active.country = Set(shipping.country.trim().to_string());
        active.updated_at = Set(now);

        let saved = if is_new {
            active.insert(conn).await?
        } else {
            active.update(conn).await?
        };
        debug!(user_id = %user_id, "Saved profile shipping address");
        Ok(saved)
    }
}
