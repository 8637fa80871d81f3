//! Upload two vectors, add them on the device, read the result back.
//!
//! Run with `cargo run --example vector_add`.

use silica::prelude::*;

const N: usize = 1024;

fn as_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn main() -> Result<()> {
    env_logger::init();

    let ctx = Context::host(Config::default())?;
    let device = ctx.default_device();
    println!("device: {} ({} compute units)", device.name(), device.compute_units());

    let queue = device.new_queue(QueueProps::default())?;

    let a = ctx.create_buffer(MemFlags::ReadOnly, N * 4)?;
    let b = ctx.create_buffer(MemFlags::ReadOnly, N * 4)?;
    let out = ctx.create_buffer(MemFlags::WriteOnly, N * 4)?;

    let a_data: Vec<f32> = (0..N).map(|i| i as f32).collect();
    let b_data: Vec<f32> = (0..N).map(|i| (N - i) as f32).collect();

    // Both uploads run asynchronously; the kernel launch waits for them.
    let a_done = a.write(&queue, &as_bytes(&a_data), 0, &[]);
    let b_done = b.write(&queue, &as_bytes(&b_data), 0, &[]);

    let source = ProgramSource::new().define("vec_add", |gid, args| {
        let a = args.arg_mem(0);
        let b = args.arg_mem(1);
        let out = args.arg_mem(2);
        let count = args.arg_u32(3) as usize;
        if gid >= count {
            return;
        }
        let at = gid * 4;
        let x = f32::from_le_bytes(a.bytes()[at..at + 4].try_into().unwrap());
        let y = f32::from_le_bytes(b.bytes()[at..at + 4].try_into().unwrap());
        out.bytes()[at..at + 4].copy_from_slice(&(x + y).to_le_bytes());
    });
    let program = ctx.build_program(source)?;
    let kernel = program.kernel("vec_add")?;
    kernel.set_arg_buffer(0, &a);
    kernel.set_arg_buffer(1, &b);
    kernel.set_arg_buffer(2, &out);
    kernel.set_arg_u32(3, N as u32);

    kernel.run_sync(&queue, N, 0, &[&a_done, &b_done])?;

    let mut result = vec![0u8; N * 4];
    out.read_sync(&queue, &mut result, 0, &[])?;

    let sums: Vec<f32> = result
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    assert!(sums.iter().all(|&v| v == N as f32));
    println!("vec_add over {N} elements: all sums equal {}", N as f32);

    Ok(())
}
