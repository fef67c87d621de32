//! 应用层实现。
//!
//! 这里提供信息流同步与投票引擎：信息流同步器、评论串控制器、投票账本，
//! 以及对外部协作方（文档存储、身份、媒体存储、时钟）的端口抽象和
//! 它们的内存实现。

pub mod cache;
pub mod clock;
pub mod comments;
pub mod error;
pub mod feed;
pub mod identity;
mod live;
pub mod media;
pub mod session;
pub mod store;
pub mod vote_ledger;

pub use cache::{ImageCache, VoteStateCache};
pub use clock::{Clock, SteppingClock, SystemClock};
pub use comments::CommentStreamController;
pub use error::{ApplicationError, ApplicationResult};
pub use feed::{FeedCursor, FeedSynchronizer, PostComposition};
pub use identity::{current_author, IdentityProvider, StaticIdentity};
pub use media::{ImageLoader, ImageUpload, MediaError, MediaStore};
pub use session::{FeedSession, SessionDependencies, SyncContext};
pub use store::{
    Cursor, Direction, DocumentStore, FieldUpdate, Filter, ListenerRegistration, OrderBy, Query,
    Snapshot, StoreError, StoreResult, Subscription,
};
pub use vote_ledger::{VoteLedger, VoteReceipt, VoteTarget};
