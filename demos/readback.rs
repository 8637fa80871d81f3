//! Await a chain of device operations instead of registering callbacks.
//!
//! Run with `cargo run --example readback`.

use silica::prelude::*;

fn main() -> Result<()> {
    env_logger::init();

    let ctx = Context::host(Config::default())?;
    let queue = ctx.default_device().new_queue(QueueProps::default())?;
    let buffer = ctx.create_buffer(MemFlags::ReadWrite, 256)?;

    futures::executor::block_on(async {
        let payload: Vec<u8> = (0..=255).collect();
        buffer
            .write(&queue, &payload, 0, &[])
            .completed()
            .await?;

        let target = HostMem::zeroed(256);
        buffer
            .read(&queue, &target, 0, &[])
            .completed()
            .await?;

        let data = target.to_vec();
        println!(
            "read {} bytes back, first={} last={}",
            data.len(),
            data[0],
            data[255]
        );
        assert_eq!(data, payload);
        Ok(())
    })
}
