use std::sync::Arc;

use request_filter::{
    Agent, Agents, Connector, DenialReason, FilterError, FilterOptions, FilteringConnector,
    LookupReporter, Resolve, Scheme, StaticResolver, SystemResolver, Target, TcpConnector,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

/// Spawn an echo server on loopback and return its port.
async fn echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 || socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    port
}

/// A port nothing listens on.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

async fn connect(options: FilterOptions, target: &str) -> request_filter::Result<()> {
    connect_with(options, Arc::new(SystemResolver), target).await
}

async fn connect_with(
    options: FilterOptions,
    resolver: Arc<dyn Resolve>,
    target: &str,
) -> request_filter::Result<()> {
    let agents = Agents::with_resolver(options, resolver)?;
    let target = url(target);
    let agent = agents.select(&target, None)?;
    let mut stream = agent.connect(&target).await?;

    stream.write_all(b"ping").await?;
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"ping");
    Ok(())
}

#[tokio::test]
async fn test_literal_loopback_denied_by_default() {
    let port = echo_server().await;

    let err = connect(FilterOptions::default(), &format!("http://127.0.0.1:{port}/"))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("private IP address"), "{err}");
    assert_eq!(
        err.to_string(),
        "DNS lookup 127.0.0.1(family:4, host:127.0.0.1) is not allowed. Because, It is private IP address."
    );
}

#[tokio::test]
async fn test_allow_listed_loopback_connects() {
    let port = echo_server().await;
    let options = FilterOptions::builder().allow_ip("127.0.0.1").build();

    connect(options, &format!("http://127.0.0.1:{port}/"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_allow_listed_cidr_connects() {
    let port = echo_server().await;
    let options = FilterOptions::builder().allow_ip("127.0.0.0/8").build();

    connect(options, &format!("http://127.0.0.1:{port}/"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_allow_private_connects() {
    let port = echo_server().await;
    let options = FilterOptions::builder().allow_private(true).build();

    connect(options, &format!("http://127.0.0.1:{port}/"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_deny_list_beats_allow_private() {
    let port = echo_server().await;
    let options = FilterOptions::builder()
        .allow_private(true)
        .deny_ip("127.0.0.1")
        .build();

    let err = connect(options, &format!("http://127.0.0.1:{port}/"))
        .await
        .unwrap_err();
    assert_eq!(err.denial().unwrap().reason, DenialReason::DenyListed);
    assert!(err.to_string().ends_with("Because It is defined in denyIPAddressList."));
}

#[tokio::test]
async fn test_deny_list_catches_mapped_ipv6_literal() {
    let port = echo_server().await;
    let options = FilterOptions::builder()
        .allow_private(true)
        .deny_ip("127.0.0.1")
        .build();

    let err = connect(options, &format!("http://[::ffff:127.0.0.1]:{port}/"))
        .await
        .unwrap_err();
    assert_eq!(err.denial().unwrap().reason, DenialReason::DenyListed);
}

#[tokio::test]
async fn test_deny_list_catches_mapped_ipv6_answer() {
    let port = echo_server().await;
    let resolver =
        StaticResolver::new().with("mapped.test", "::ffff:127.0.0.1".parse().unwrap());
    let options = FilterOptions::builder()
        .allow_private(true)
        .deny_ip("127.0.0.0/8")
        .build();

    let err = connect_with(
        options,
        Arc::new(resolver),
        &format!("http://mapped.test:{port}/"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.denial().unwrap().reason, DenialReason::DenyListed);
}

#[tokio::test]
async fn test_localhost_denied_after_resolution() {
    let port = echo_server().await;

    let err = connect(FilterOptions::default(), &format!("http://localhost:{port}/"))
        .await
        .unwrap_err();

    let denial = err.denial().expect("localhost resolves to loopback");
    assert_eq!(denial.reason, DenialReason::Private);
    assert_eq!(denial.host.as_deref(), Some("localhost"));
    assert!(denial.family.is_some());
}

#[tokio::test]
async fn test_name_resolving_to_loopback_denied() {
    let port = echo_server().await;
    let resolver = StaticResolver::new().with("127.0.0.1.nip.test", "127.0.0.1".parse().unwrap());

    let err = connect_with(
        FilterOptions::default(),
        Arc::new(resolver),
        &format!("http://127.0.0.1.nip.test:{port}/"),
    )
    .await
    .unwrap_err();

    assert_eq!(
        err.to_string(),
        "DNS lookup 127.0.0.1(family:4, host:127.0.0.1.nip.test) is not allowed. Because, It is private IP address."
    );
}

#[tokio::test]
async fn test_rebinding_answer_denied_even_with_public_first() {
    let port = echo_server().await;
    let resolver = StaticResolver::new()
        .with("rebind.test", "93.184.216.34".parse().unwrap())
        .with("rebind.test", "127.0.0.1".parse().unwrap());

    let err = connect_with(
        FilterOptions::default(),
        Arc::new(resolver),
        &format!("http://rebind.test:{port}/"),
    )
    .await
    .unwrap_err();

    assert_eq!(err.denial().unwrap().address.to_string(), "127.0.0.1");
}

#[tokio::test]
async fn test_name_resolving_to_allow_listed_address_connects() {
    let port = echo_server().await;
    let resolver = StaticResolver::new().with("svc.internal.test", "127.0.0.1".parse().unwrap());
    let options = FilterOptions::builder().allow_ip("127.0.0.1").build();

    connect_with(
        options,
        Arc::new(resolver),
        &format!("http://svc.internal.test:{port}/"),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_meta_address_denied_even_with_allow_private() {
    let port = closed_port().await;
    let options = FilterOptions::builder().allow_private(true).build();

    let err = connect(options, &format!("http://0.0.0.0:{port}/"))
        .await
        .unwrap_err();

    assert_eq!(err.denial().unwrap().reason, DenialReason::Meta);
    assert!(err.to_string().ends_with("Because, It is meta IP address."));
}

#[tokio::test]
async fn test_port_scanning_guard_denies_before_connect() {
    let port = closed_port().await;
    let options = FilterOptions::builder()
        .allow_private(true)
        .stop_port_scanning(true)
        .build();

    let agents = Agents::new(options).unwrap();
    let target = url(&format!("http://127.0.0.1:{port}/"));
    let agent = agents.select(&target, None).unwrap();
    let err = agent.connect(&target).await.unwrap_err();

    // a denial, not ConnectionRefused: the closed port is never dialed
    assert_eq!(err.denial().unwrap().reason, DenialReason::PortScanning);
    let snapshot = agent.metrics().snapshot();
    assert_eq!(snapshot.denied_preflight, 1);
    assert_eq!(snapshot.failed, 0);
}

#[tokio::test]
async fn test_closed_port_without_guard_is_transport_error() {
    let port = closed_port().await;
    let options = FilterOptions::builder().allow_private(true).build();

    let err = connect(options, &format!("http://127.0.0.1:{port}/"))
        .await
        .unwrap_err();
    assert!(matches!(err, FilterError::Io(_)), "{err}");
}

#[tokio::test]
async fn test_non_canonical_ipv4_in_url_is_normalized() {
    let port = echo_server().await;

    for host in ["0x7f000001", "2130706433", "0177.0.0.1"] {
        let err = connect(FilterOptions::default(), &format!("http://{host}:{port}/"))
            .await
            .unwrap_err();
        assert_eq!(err.denial().unwrap().address.to_string(), "127.0.0.1", "{host}");
    }
}

#[tokio::test]
async fn test_non_canonical_ipv4_through_system_resolver() {
    let port = echo_server().await;
    let gate = FilteringConnector::from_options(TcpConnector::new(), FilterOptions::default());

    // resolver support for these spellings varies; a resolver that rejects
    // them fails with Io, one that accepts them must yield loopback
    for host in ["0x7f000001", "017700000001"] {
        let target = Target::new(host, port).unwrap();
        let err = match gate.connect(&target, LookupReporter::detached()).await {
            Ok(_) => panic!("{host} connected"),
            Err(FilterError::Io(_)) => continue,
            Err(e) => e,
        };
        let denial = err.denial().expect("resolved spelling is denied");
        assert_eq!(denial.reason, DenialReason::Private, "{host}");
        assert_eq!(denial.address.to_string(), "127.0.0.1", "{host}");
        assert_eq!(denial.host.as_deref(), Some(host));
    }
}

#[tokio::test]
async fn test_ipv6_loopback_denied() {
    let err = connect(FilterOptions::default(), "http://[::1]:80/")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "DNS lookup ::1(family:6, host:::1) is not allowed. Because, It is private IP address."
    );
}

#[tokio::test]
async fn test_https_private_literal_refused_before_handshake() {
    let port = echo_server().await;
    let agents = Agents::new(FilterOptions::default()).unwrap();
    let target = url(&format!("https://127.0.0.1:{port}/"));

    let agent = agents.select(&target, None).unwrap();
    assert!(matches!(agent, Agent::Https(_)));
    let err = agent.connect(&target).await.unwrap_err();

    assert!(err.is_denied());
    assert_eq!(agent.metrics().snapshot().denied_preflight, 1);
}

#[tokio::test]
async fn test_select_shares_default_agent() {
    let agents = Agents::new(FilterOptions::default()).unwrap();
    let a = agents.select(&url("http://a.test/"), None).unwrap();
    let b = agents.select(&url("http://b.test/x"), None).unwrap();
    assert!(a.ptr_eq(&b));
    assert!(a.ptr_eq(agents.shared(Scheme::Http)));

    let options = FilterOptions::builder().allow_ip("10.0.0.0/8").build();
    let c = agents.select(&url("http://a.test/"), Some(&options)).unwrap();
    assert!(!a.ptr_eq(&c));
}

#[tokio::test]
async fn test_invalid_cidr_warns_and_still_denies() {
    let port = echo_server().await;
    let options = FilterOptions::builder().allow_ip("127.0.0.0/invalid").build();

    let agents = Agents::new(options).unwrap();
    let target = url(&format!("http://127.0.0.1:{port}/"));
    let agent = agents.select(&target, None).unwrap();

    assert_eq!(agent.policy().warnings().len(), 1);
    assert_eq!(
        agent.policy().warnings()[0].to_string(),
        "[request-filtering-agent] Invalid CIDR in allowIPAddressList: 127.0.0.0/invalid"
    );
    let err = agent.connect(&target).await.unwrap_err();
    assert_eq!(err.denial().unwrap().reason, DenialReason::Private);
}

#[tokio::test]
async fn test_denial_converts_to_io_error() {
    let err = connect(FilterOptions::default(), "http://10.0.0.1:80/")
        .await
        .unwrap_err();
    let io_err: std::io::Error = err.into();

    assert_eq!(io_err.kind(), std::io::ErrorKind::PermissionDenied);
    assert!(io_err.to_string().contains("private IP address"));
}
