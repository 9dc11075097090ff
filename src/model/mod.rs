//! Core data model types: messages, attachments, chat fragments and addresses.

pub mod address;
pub mod attachment;
pub mod conversation;
pub mod mail;
