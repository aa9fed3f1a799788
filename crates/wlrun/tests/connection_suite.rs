//! Integration tests: a client and a server connection talking over a
//! channel transport, each with its own runtime.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use wlwire::Argument;
use wlwire::MessageSpec;
use wlwire::Protocol;
use wlwire::ProtocolBuilder;

use wlrun::ChannelTransport;
use wlrun::Connection;
use wlrun::ConnectionBuilder;
use wlrun::Dispatched;
use wlrun::Error;
use wlrun::Handlers;
use wlrun::Implementation;
use wlrun::Runtime;
use wlrun::Side;
use wlrun::WireObject;

const WAIT: Duration = Duration::from_millis(200);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn protocol() -> Arc<Protocol> {
    let mut p = ProtocolBuilder::new("demo");
    let display = p.declare("demo_display", 1);
    let compositor = p.declare("demo_compositor", 4);
    let surface = p.declare("demo_surface", 4);
    let output = p.declare("demo_output", 3);
    p.define(display, [], [MessageSpec::new("error", "ous")]).unwrap();
    p.define(
        compositor,
        [MessageSpec::new("create_surface", "n").interfaces([Some(surface)])],
        [],
    )
    .unwrap();
    p.define(
        surface,
        [MessageSpec::new("set_title", "?s"), MessageSpec::new("destroy", "")],
        [MessageSpec::new("enter", "o").interfaces([Some(output)])],
    )
    .unwrap();
    p.define(output, [MessageSpec::new("release", "")], [MessageSpec::new("scale", "i")])
        .unwrap();
    p.build().unwrap()
}

// --- Server side ---

struct Compositor {
    connection: Weak<Connection>,
}

impl Implementation for Compositor {
    fn handlers() -> Handlers<Self> {
        Handlers::<Self>::new().on(0, |compositor, object, args| {
            let id = args[0].as_new_id().ok_or_else(|| anyhow::anyhow!("missing new_id"))?;
            let connection = compositor
                .connection
                .upgrade()
                .ok_or_else(|| anyhow::anyhow!("connection gone"))?;
            let interface = connection.interface("demo_surface")?;
            connection.create_object(&interface, id, object.version(), ServerSurface::default())?;
            Ok(())
        })
    }
}

#[derive(Default)]
struct ServerSurface {
    titles: Mutex<Vec<Option<String>>>,
}

impl Implementation for ServerSurface {
    fn handlers() -> Handlers<Self> {
        Handlers::<Self>::new()
            .on(0, |surface, _, args| {
                surface.titles.lock().unwrap().push(args[0].as_str().map(str::to_string));
                Ok(())
            })
            .on(1, |_, _, _| Ok(()))
    }
}

// --- Client side ---

#[derive(Default)]
struct ClientDisplay {
    errors: Mutex<Vec<(WireObject, u32, String)>>,
}

impl Implementation for ClientDisplay {
    fn handlers() -> Handlers<Self> {
        Handlers::<Self>::new().on(0, |display, _, args| {
            let object = args[0].as_object().cloned().ok_or_else(|| anyhow::anyhow!("no object"))?;
            let code = args[1].as_uint().unwrap_or_default();
            let message = args[2].as_str().unwrap_or_default().to_string();
            display.errors.lock().unwrap().push((object, code, message));
            Ok(())
        })
    }
}

#[derive(Default)]
struct ClientSurface {
    outputs: Mutex<Vec<WireObject>>,
}

impl Implementation for ClientSurface {
    fn handlers() -> Handlers<Self> {
        Handlers::<Self>::new().on(0, |surface, _, args| {
            if let Some(output) = args[0].as_object() {
                surface.outputs.lock().unwrap().push(output.clone());
            }
            Ok(())
        })
    }
}

struct Session {
    client: Connection,
    server: Arc<Connection>,
    display: WireObject,
    compositor: WireObject,
}

fn session() -> Session {
    init_tracing();
    let protocol = protocol();
    let (client_end, server_end) = ChannelTransport::pair();

    let client = ConnectionBuilder::new(Arc::new(Runtime::new()), Arc::clone(&protocol), Side::Client)
        .transport(client_end)
        .build()
        .unwrap();
    let server = Arc::new(
        ConnectionBuilder::new(Arc::new(Runtime::new()), protocol, Side::Server)
            .transport(server_end)
            .build()
            .unwrap(),
    );

    let display_iface = client.interface("demo_display").unwrap();
    let display = client.create_object(&display_iface, 1, 1, ClientDisplay::default()).unwrap();
    let compositor_iface = client.interface("demo_compositor").unwrap();
    let compositor = client.create_proxy(&compositor_iface, 2, 4).unwrap();

    server
        .create_object(&compositor_iface, 2, 4, Compositor { connection: Arc::downgrade(&server) })
        .unwrap();

    Session { client, server, display, compositor }
}

fn create_surface(s: &Session, id: u32) -> WireObject {
    let interface = s.client.interface("demo_surface").unwrap();
    let surface = s.client.create_object(&interface, id, 4, ClientSurface::default()).unwrap();
    s.client.post(&s.compositor, 0, &[Argument::NewId(id)]).unwrap();
    s.server.poll(Some(WAIT)).unwrap().unwrap().into_result().unwrap();
    surface
}

#[test]
fn test_request_creates_server_object() {
    let s = session();
    create_surface(&s, 3);

    let server_surface = s.server.object_by_id(3).unwrap();
    assert_eq!(server_surface.interface().name, "demo_surface");
    assert_eq!(server_surface.version(), 4);
    assert!(server_surface.implementation::<ServerSurface>().is_some());
}

#[test]
fn test_requests_carry_arguments() {
    let s = session();
    let surface = create_surface(&s, 3);

    s.client.post(&surface, 0, &[Argument::Str(Some("hello".into()))]).unwrap();
    s.client.post(&surface, 0, &[Argument::Str(None)]).unwrap();
    assert_eq!(s.server.poll_all(Duration::from_millis(20)).unwrap(), 2);

    let server_surface = s.server.object_by_id(3).unwrap();
    let titles = server_surface.implementation::<ServerSurface>().unwrap().titles.lock().unwrap().clone();
    assert_eq!(titles, vec![Some("hello".to_string()), None]);
}

#[test]
fn test_event_reconstructs_unseen_object_on_client() {
    let s = session();
    let surface = create_surface(&s, 3);

    let output_iface = s.server.interface("demo_output").unwrap();
    let output = s.server.create_proxy(&output_iface, 0xff00_0000, 3).unwrap();
    let server_surface = s.server.object_by_id(3).unwrap();
    s.server.post(&server_surface, 0, &[Argument::Object(Some(output))]).unwrap();

    s.client.poll(Some(WAIT)).unwrap().unwrap().into_result().unwrap();

    let seen = surface.implementation::<ClientSurface>().unwrap().outputs.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    let client_output = &seen[0];
    assert_eq!(client_output.id(), 0xff00_0000);
    assert_eq!(client_output.interface().name, "demo_output");
    assert_eq!(client_output.version(), 3);
    assert!(s.client.object_by_id(0xff00_0000).unwrap().ptr_eq(client_output));

    // A second event with the same id resolves to the same client object.
    let output = s.server.object_by_id(0xff00_0000).unwrap();
    s.server.post(&server_surface, 0, &[Argument::Object(Some(output))]).unwrap();
    s.client.poll(Some(WAIT)).unwrap().unwrap().into_result().unwrap();
    let seen = surface.implementation::<ClientSurface>().unwrap().outputs.lock().unwrap().clone();
    assert!(seen[1].ptr_eq(&seen[0]));
}

#[test]
fn test_protocol_error_reaches_client_display() {
    let s = session();
    let surface = create_surface(&s, 3);
    let server_surface = s.server.object_by_id(3).unwrap();

    s.server.post_error(&server_surface, 7, "bad surface").unwrap();
    s.client.poll(Some(WAIT)).unwrap().unwrap().into_result().unwrap();

    let errors = s.display.implementation::<ClientDisplay>().unwrap().errors.lock().unwrap().clone();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].0.ptr_eq(&surface));
    assert_eq!(errors[0].1, 7);
    assert_eq!(errors[0].2, "bad surface");
}

#[test]
fn test_unknown_target_is_not_dispatched() {
    let s = session();
    let interface = s.client.interface("demo_surface").unwrap();
    // Created locally but never announced to the server.
    let ghost = s.client.create_proxy(&interface, 9, 4).unwrap();
    s.client.post(&ghost, 1, &[]).unwrap();

    let outcome = s.server.poll(Some(WAIT)).unwrap().unwrap();
    assert!(matches!(outcome, Dispatched::No(Error::UnknownId(9))));
}

#[test]
fn test_server_close_is_seen_by_client() {
    let s = session();
    create_surface(&s, 3);
    let server_surface = s.server.object_by_id(3).unwrap();

    s.server.close().unwrap();
    assert!(server_surface.is_destroyed());
    assert!(s.server.object_by_id(2).is_none());

    let Session { client, server, .. } = s;
    drop(server);
    assert!(matches!(client.poll(Some(WAIT)), Err(Error::Transport(_))));
}
