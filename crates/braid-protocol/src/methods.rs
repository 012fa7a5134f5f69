//! Wire-level `type` discriminator strings (spec §4.3), kept as named
//! constants so call sites outside this crate don't duplicate string
//! literals — mirrors `skynet-protocol::methods`.

pub const PING: &str = "ping";
pub const JOIN_ROOM: &str = "join_room";
pub const LEAVE_ROOM: &str = "leave_room";
pub const TYPING: &str = "typing";
pub const ABORT: &str = "abort";
pub const CHAT: &str = "chat";
pub const CONTINUE: &str = "continue";
pub const REGENERATE: &str = "regenerate";
pub const EDIT: &str = "edit";
pub const DELETE: &str = "delete";

pub const CONNECTED: &str = "connected";
pub const ERROR: &str = "error";
pub const PONG: &str = "pong";
pub const ROOM_JOINED: &str = "room_joined";
pub const ROOM_LEFT: &str = "room_left";
pub const USER_JOINED: &str = "user_joined";
pub const USER_LEFT: &str = "user_left";
pub const USER_TYPING: &str = "user_typing";
pub const AI_GENERATING: &str = "ai_generating";
pub const AI_FINISHED: &str = "ai_finished";
pub const MESSAGE_CREATED: &str = "message_created";
pub const MESSAGE_EDITED: &str = "message_edited";
pub const MESSAGE_DELETED: &str = "message_deleted";
pub const MESSAGE_RESTORED: &str = "message_restored";
pub const MESSAGE_BRANCH_RESTORED: &str = "message_branch_restored";
pub const MESSAGE_SPLIT: &str = "message_split";
pub const BRANCH_VISIBILITY_CHANGED: &str = "branch_visibility_changed";
pub const STREAM: &str = "stream";
pub const METRICS_UPDATE: &str = "metrics_update";
pub const CONTENT_BLOCKED: &str = "content_blocked";
pub const AI_REQUEST_QUEUED: &str = "ai_request_queued";
pub const GENERATION_ABORTED: &str = "generation_aborted";
