//! Tests of the structural bounds enforced by the payload constructors, and of `validate`
//! agreeing with them after deserialization would have bypassed the constructors.

use gossipy::payload::{
    ChannelPayload, CommentPayload, Payload, PlaylistPayload, MAX_COMMENT_LEN,
    MAX_DESCRIPTION_LEN, MAX_NAME_LEN,
};

#[test]
fn channel_names_are_bounded() {
    assert!(ChannelPayload::new("", "").is_err());
    assert!(ChannelPayload::new(&"x".repeat(MAX_NAME_LEN + 1), "").is_err());
    assert!(ChannelPayload::new(&"x".repeat(MAX_NAME_LEN), "").is_ok());

    assert!(ChannelPayload::new("ok", &"d".repeat(MAX_DESCRIPTION_LEN + 1)).is_err());
    assert!(ChannelPayload::new("ok", &"d".repeat(MAX_DESCRIPTION_LEN)).is_ok());
}

#[test]
fn playlist_names_are_bounded() {
    assert!(PlaylistPayload::new("", "").is_err());
    assert!(PlaylistPayload::new(&"x".repeat(MAX_NAME_LEN), "").is_ok());
}

#[test]
fn comment_text_is_bounded() {
    assert!(CommentPayload::new("", 0, None, None, None, None).is_err());
    assert!(
        CommentPayload::new(&"c".repeat(MAX_COMMENT_LEN + 1), 0, None, None, None, None).is_err()
    );
    assert!(CommentPayload::new(&"c".repeat(MAX_COMMENT_LEN), 0, None, None, None, None).is_ok());
}

#[test]
fn validate_agrees_with_the_constructors() {
    let channel = Payload::Channel(ChannelPayload::new("my channel", "about things").unwrap());
    assert!(channel.validate().is_ok());
    assert_eq!(channel.kind(), "channel");

    let comment =
        Payload::Comment(CommentPayload::new("nice", 12, None, None, None, Some([9; 20])).unwrap());
    assert!(comment.validate().is_ok());
    assert_eq!(comment.kind(), "comment");
}
