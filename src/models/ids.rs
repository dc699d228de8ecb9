//! Typed identifiers, one newtype per entity, following the teacher's
//! `derive_more`-based `MessageId` pattern.

use derive_more::{Deref, Display, From, FromStr};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            From,
            Display,
            Deref,
            FromStr,
            Serialize,
            Deserialize,
            sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

typed_id!(TenantId);
typed_id!(DomainId);
typed_id!(OutboxId);
typed_id!(RecipientId);
typed_id!(EmailLogId);
typed_id!(EmailEventId);
typed_id!(SuppressionId);
typed_id!(IpPoolId);
typed_id!(WebhookId);
typed_id!(WebhookDeliveryId);
typed_id!(DeadLetterId);
