use crate::channels;
use crate::channels::dingtalk::DingTalk;
use crate::error::NotifyError;
use crate::Notifier;
use loghive_common::types::NotifyMethod;

#[test]
fn dingtalk_payload_is_a_text_message() {
    let payload = DingTalk::payload("[QELOG]\n标签: 生产");
    assert_eq!(payload["msgtype"], "text");
    assert_eq!(payload["text"]["content"], "[QELOG]\n标签: 生产");
}

#[test]
fn create_picks_the_method_implementation() {
    let channel = channels::create(
        NotifyMethod::DingTalk,
        "https://oapi.dingtalk.com/robot/send?access_token=t",
    );
    assert_eq!(channel.method_name(), "dingtalk");
}

#[tokio::test]
async fn sending_without_endpoint_fails_fast() {
    let channel = DingTalk::new();
    let err = channel.send("content").await.unwrap_err();
    assert!(matches!(err, NotifyError::NoEndpoint("dingtalk")));
}
