//! Push notifications: inbound delivery, interaction routing, and the
//! subscription lifecycle. Independent of the request/response cycle — this
//! is the server-to-user path.

mod notification;
mod subscription;

pub use notification::{
  deliver, interaction_target, Notification, NotificationAction, NotificationData,
  NotificationSink,
};
pub use subscription::{
  PermissionState, PushPlatform, SubscribeOutcome, SubscriptionDescriptor, SubscriptionKeys,
  SubscriptionManager,
};
