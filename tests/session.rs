// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end session tests: a real client and a real server talking over
//! an in-memory duplex stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::DuplexStream;
use tokio::sync::mpsc::UnboundedReceiver;

use rfbkit::{
    AuthenticationMethod, ClientConnectOptions, ClientEvent, ClientSession, Framebuffer,
    PasswordAuthenticator, PixelFormat, Rectangle, ServerEvent, ServerSession,
    ServerSessionOptions, VncError,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn next_event<T>(receiver: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

fn pair() -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(1 << 20)
}

struct Peer {
    framebuffer: Framebuffer,
    server_events: UnboundedReceiver<ServerEvent>,
    client: ClientSession<DuplexStream>,
    client_events: UnboundedReceiver<ClientEvent>,
    server_task: tokio::task::JoinHandle<rfbkit::Result<()>>,
    server_handle: rfbkit::ServerSessionHandle,
}

/// Stands up a server over one end of a duplex pipe and a client over the
/// other. The client has not connected yet.
fn stand_up(
    server_options: ServerSessionOptions,
    client_options: ClientConnectOptions,
) -> Peer {
    let (client_stream, server_stream) = pair();
    let framebuffer = Framebuffer::new("itest", 64, 48, PixelFormat::rgb32());
    let (server, server_events) = ServerSession::new(
        server_stream,
        Box::new(framebuffer.clone()),
        server_options,
    );
    let server_handle = server.handle();
    let server_task = tokio::spawn(server.run());
    let (client, client_events) = ClientSession::new(client_stream, client_options);
    Peer {
        framebuffer,
        server_events,
        client,
        client_events,
        server_task,
        server_handle,
    }
}

#[tokio::test]
async fn handshake_without_authentication() {
    init_logging();
    let mut peer = stand_up(
        ServerSessionOptions::default(),
        ClientConnectOptions::default(),
    );

    peer.client.connect().await.unwrap();
    assert!(matches!(
        next_event(&mut peer.client_events).await,
        ClientEvent::Connected
    ));
    assert!(matches!(
        next_event(&mut peer.server_events).await,
        ServerEvent::Connected
    ));

    let handle = peer.client.handle();
    let fb = handle.framebuffer().await.expect("framebuffer after init");
    assert_eq!((fb.width(), fb.height()), (64, 48));
    assert_eq!(fb.name(), "itest");

    // Closing the client ends the server loop cleanly.
    handle.close().await;
    peer.server_task.await.unwrap().unwrap();
    assert!(matches!(
        next_event(&mut peer.server_events).await,
        ServerEvent::Closed
    ));
}

#[tokio::test]
async fn handshake_with_password() {
    init_logging();
    let mut peer = stand_up(
        ServerSessionOptions {
            authentication: AuthenticationMethod::Password(Arc::new(
                PasswordAuthenticator::new("secret"),
            )),
            ..Default::default()
        },
        ClientConnectOptions {
            password: Some("secret".to_string()),
            ..Default::default()
        },
    );

    peer.client.connect().await.unwrap();
    assert!(matches!(
        next_event(&mut peer.client_events).await,
        ClientEvent::Connected
    ));
    assert!(matches!(
        next_event(&mut peer.server_events).await,
        ServerEvent::Connected
    ));
}

#[tokio::test]
async fn password_provider_supplies_the_password() {
    init_logging();
    let mut peer = stand_up(
        ServerSessionOptions {
            authentication: AuthenticationMethod::Password(Arc::new(
                PasswordAuthenticator::new("secret"),
            )),
            ..Default::default()
        },
        ClientConnectOptions {
            password_provider: Some(Box::new(|| Some("secret".to_string()))),
            ..Default::default()
        },
    );

    peer.client.connect().await.unwrap();
    assert!(matches!(
        next_event(&mut peer.client_events).await,
        ClientEvent::Connected
    ));

    // The session future must stay spawnable with a provider configured.
    tokio::spawn(peer.client.run());
    assert!(matches!(
        next_event(&mut peer.server_events).await,
        ServerEvent::Connected
    ));
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    init_logging();
    let mut peer = stand_up(
        ServerSessionOptions {
            authentication: AuthenticationMethod::Password(Arc::new(
                PasswordAuthenticator::new("secret"),
            )),
            ..Default::default()
        },
        ClientConnectOptions {
            password: Some("wrong".to_string()),
            ..Default::default()
        },
    );

    let err = peer.client.connect().await.unwrap_err();
    assert!(matches!(err, VncError::AuthenticationFailed(_)));
    assert!(matches!(
        next_event(&mut peer.client_events).await,
        ClientEvent::ConnectionFailed
    ));
    assert!(matches!(
        next_event(&mut peer.server_events).await,
        ServerEvent::ConnectionFailed
    ));
    assert!(peer.server_task.await.unwrap().is_err());
}

#[tokio::test]
async fn missing_password_fails_before_responding() {
    init_logging();
    let mut peer = stand_up(
        ServerSessionOptions {
            authentication: AuthenticationMethod::Password(Arc::new(
                PasswordAuthenticator::new("secret"),
            )),
            ..Default::default()
        },
        ClientConnectOptions::default(),
    );

    let err = peer.client.connect().await.unwrap_err();
    assert!(matches!(err, VncError::PasswordRequired));
    assert!(matches!(
        next_event(&mut peer.client_events).await,
        ClientEvent::ConnectionFailed
    ));
}

#[tokio::test]
async fn pixel_change_reaches_the_client() {
    init_logging();
    let mut peer = stand_up(
        ServerSessionOptions::default(),
        ClientConnectOptions::default(),
    );

    peer.client.connect().await.unwrap();
    assert!(matches!(
        next_event(&mut peer.client_events).await,
        ClientEvent::Connected
    ));

    let handle = peer.client.handle();
    tokio::spawn(peer.client.run());

    // The initial non-incremental request produces a full-frame update.
    loop {
        if let ClientEvent::FramebufferChanged { .. } =
            next_event(&mut peer.client_events).await
        {
            break;
        }
    }

    // One changed pixel comes back as exactly one aligned tile.
    peer.framebuffer.set_pixel(40, 10, &[1, 2, 3, 0]).await;
    peer.server_handle.framebuffer_changed();

    let tile = Rectangle::new(32, 0, 32, 32);
    'outer: loop {
        if let ClientEvent::FramebufferChanged { rectangles } =
            next_event(&mut peer.client_events).await
        {
            assert_eq!(rectangles.len(), 1);
            for r in rectangles {
                if r == tile {
                    break 'outer;
                }
            }
            panic!("unexpected update rectangle");
        }
    }

    let fb = handle.framebuffer().await.unwrap();
    let pixel = fb
        .get_rect(Rectangle::new(40, 10, 1, 1), &PixelFormat::rgb32())
        .await;
    assert_eq!(pixel, vec![1, 2, 3, 0]);
}

#[tokio::test]
async fn bell_and_clipboard_both_ways() {
    init_logging();
    let mut peer = stand_up(
        ServerSessionOptions::default(),
        ClientConnectOptions::default(),
    );

    peer.client.connect().await.unwrap();
    assert!(matches!(
        next_event(&mut peer.client_events).await,
        ClientEvent::Connected
    ));
    assert!(matches!(
        next_event(&mut peer.server_events).await,
        ServerEvent::Connected
    ));

    let client_handle = peer.client.handle();
    tokio::spawn(peer.client.run());

    peer.server_handle.bell().await.unwrap();
    peer.server_handle.send_clipboard("from server").await.unwrap();
    client_handle.send_clipboard("from client").await.unwrap();
    client_handle.send_key_event(0x61, true).await.unwrap();
    client_handle.send_pointer_event(5, 7, 1).await.unwrap();

    let mut saw_bell = false;
    let mut saw_clip = false;
    while !(saw_bell && saw_clip) {
        match next_event(&mut peer.client_events).await {
            ClientEvent::Bell => saw_bell = true,
            ClientEvent::RemoteClipboardChanged { text } => {
                assert_eq!(text, "from server");
                saw_clip = true;
            }
            _ => {}
        }
    }

    let mut saw_key = false;
    let mut saw_pointer = false;
    let mut saw_clip = false;
    while !(saw_key && saw_pointer && saw_clip) {
        match next_event(&mut peer.server_events).await {
            ServerEvent::KeyChanged { keysym, pressed } => {
                assert_eq!((keysym, pressed), (0x61, true));
                saw_key = true;
            }
            ServerEvent::PointerChanged { x, y, button_mask } => {
                assert_eq!((x, y, button_mask), (5, 7, 1));
                saw_pointer = true;
            }
            ServerEvent::RemoteClipboardChanged { text } => {
                assert_eq!(text, "from client");
                saw_clip = true;
            }
            _ => {}
        }
    }
}
