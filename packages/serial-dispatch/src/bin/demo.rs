//! Exercises a dispatcher with nested and interleaved submissions, printing as it goes.

use anyhow::{Context, Result};
use serial_dispatch::{error::SyncError, Dispatcher};
use std::sync::{
    atomic::{AtomicI32, Ordering},
    Arc,
};
use tracing::{info, warn, Level};

fn func() {
    println!("func()");
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let dispatcher = Dispatcher::builder()
        .with_thread_name("demo-dispatcher")
        .start()
        .context("failed to start dispatcher")?;
    let handle = dispatcher.handle();

    println!("Hello, serial dispatcher!");

    dispatcher.exec_sync(|| println!("sync: 0"))?;
    dispatcher.exec_sync(|| println!("sync: 1"))?;

    let h = handle.clone();
    dispatcher.exec_sync(move || -> Result<(), SyncError> {
        println!("sync: 2");
        let h2 = h.clone();
        h.exec_sync(move || {
            println!("sync: 2-1");
            h2.exec_sync(|| println!("sync: 2-1-1"))
        })??;
        Ok(())
    })??;

    dispatcher.exec_async(func)?;

    println!("end of sync");

    let h = handle.clone();
    dispatcher.exec_async(move || {
        println!("async: first");
        let h2 = h.clone();
        let nested = h.exec_sync(move || {
            println!("sync in async");
            let h3 = h2.clone();
            h2.exec_async(move || {
                println!("async in sync in async");
                if let Err(e) = h3.exec_async(|| println!("async in async in sync in async")) {
                    warn!(%e, "innermost submission failed");
                }
            })
        });
        match nested {
            Ok(Ok(())) => (),
            Ok(Err(e)) => warn!(%e, "nested async submission failed"),
            Err(e) => warn!(%e, "nested sync submission failed"),
        }
    })?;

    let x = Arc::new(AtomicI32::new(0));
    let x2 = Arc::clone(&x);
    dispatcher.exec_async(move || {
        println!("async: x:=100");
        x2.store(100, Ordering::SeqCst);
    })?;
    let x2 = Arc::clone(&x);
    dispatcher.exec_async(move || println!("async: x={}", x2.load(Ordering::SeqCst)))?;

    let x2 = Arc::clone(&x);
    let product = dispatcher.exec_sync(move || x2.load(Ordering::SeqCst) * 100)?;
    println!("sync: x*100={}", product);

    match dispatcher.exec_sync::<_, ()>(|| panic!("error_sync")) {
        Err(SyncError::TaskFailed(failure)) => {
            println!("sync: caught {:?}", failure.message().unwrap_or_default());
        }
        other => anyhow::bail!("expected task failure, got {:?}", other),
    }

    dispatcher.exec_async(|| println!("async: last"))?;

    println!("end of main()");
    drop(dispatcher);
    info!("dispatcher drained and stopped");
    Ok(())
}
