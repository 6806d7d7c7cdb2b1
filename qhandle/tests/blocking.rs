use qhandle::{Error, blocking::BlockingHandle, handy::*};

mod common;
use common::*;

#[test]
fn blocking_echo() -> Result<(), BoxError> {
    init_tracing();
    // the server runs on its own runtime, the blocking handle brings another one
    let server_rt = tokio::runtime::Runtime::new()?;
    let (listener, server_task) = server_rt.block_on(async { launch_echo_server(server_parameters()) })?;
    server_rt.spawn(server_task);
    let port = listener.local_addr()?.port();

    let mut handle = BlockingHandle::with_client(launch_test_client(client_parameters()))?;
    assert!(!handle.is_connected());
    assert!(matches!(handle.send(b"early"), Err(Error::NotConnected)));

    handle.connect(SERVER_HOST, port)?;
    assert!(handle.is_connected());
    assert_eq!(handle.remote_addr(), Some(listener.local_addr()?));

    handle.send(TEST_DATA)?;
    let mut back = vec![0u8; TEST_DATA.len()];
    let mut filled = 0;
    while filled < back.len() {
        let n = handle.receive(&mut back[filled..])?;
        assert_ne!(n, 0, "stream ended before all data was echoed");
        filled += n;
    }
    assert_eq!(back, TEST_DATA);

    handle.close()?;
    handle.close()?;
    assert!(!handle.is_connected());

    listener.close();
    Ok(())
}

#[test]
fn blocking_connect_failure_codes() -> Result<(), BoxError> {
    init_tracing();
    let mut handle = BlockingHandle::with_client(launch_test_client(client_parameters()))?;

    let result = handle.connect("", 4433);
    assert_ne!(qhandle::code_of(&result), 0);
    let result = handle.connect(SERVER_HOST, 0);
    assert!(matches!(result, Err(Error::InvalidAddress { .. })));
    assert!(!handle.is_connected());
    assert_eq!(qhandle::code_of(&handle.close()), 0);
    Ok(())
}
