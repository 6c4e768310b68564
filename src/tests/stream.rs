use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::OutputStream;

fn stream_of(chunks: &[&'static [u8]]) -> OutputStream {
    let (tx, rx) = mpsc::unbounded_channel();
    for chunk in chunks {
        tx.send(Bytes::from_static(chunk)).unwrap();
    }
    OutputStream::new(rx)
}

#[tokio::test]
async fn bytes_preserve_order() {
    let data = stream_of(&[b"ab", b"", b"cd", b"e"]).bytes().await;
    assert_eq!(data, b"abcde");
}

#[tokio::test]
async fn empty_stream_ends_immediately() {
    let mut stream = OutputStream::empty();
    assert!(stream.next().await.is_none());
    assert_eq!(OutputStream::empty().string().await, "");
}

#[tokio::test]
async fn string_replaces_invalid_utf8() {
    let text = stream_of(&[b"ok \xff"]).string().await;
    assert_eq!(text, "ok \u{fffd}");
}

#[tokio::test]
async fn lines_split_across_chunks() {
    let lines: Vec<String> = stream_of(&[b"fir", b"st\nsec", b"ond\r\n\nlast"])
        .lines()
        .collect()
        .await;
    assert_eq!(lines, ["first", "second", "", "last"]);
}

#[tokio::test]
async fn lines_without_trailing_partial() {
    let lines: Vec<String> = stream_of(&[b"a\nb\n"]).lines().collect().await;
    assert_eq!(lines, ["a", "b"]);
}
