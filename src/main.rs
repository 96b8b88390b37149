//! vxrt CLI
//!
//! A small front end over the runtime: lists targets and kernels, runs a demo graph and
//! applies built-in kernels to image files.

use anyhow::{bail, Context as _, Result};
use vxrt::io::{load_image, save_image};
use vxrt::prelude::*;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        return;
    }

    let result = match args[1].as_str() {
        "targets" => list_targets(),
        "kernels" => list_kernels(args.get(2).map(String::as_str)),
        "demo" => run_demo(),
        "dot" => print_dot(),
        "and" => match &args[2..] {
            [a, b, out] => and_files(a, b, out),
            _ => Err(anyhow::anyhow!("usage: {} and <a> <b> <out>", args[0])),
        },
        "gray" => match &args[2..] {
            [input, out] => gray_file(input, out),
            _ => Err(anyhow::anyhow!("usage: {} gray <in> <out>", args[0])),
        },
        "help" | "--help" | "-h" => {
            print_usage(&args[0]);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage(&args[0]);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn print_usage(program: &str) {
    println!("vxrt v{}", vxrt::VERSION);
    println!();
    println!("Usage: {} <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  targets               List targets in priority order");
    println!("  kernels [target]      List the kernels of one or every target");
    println!("  demo                  Run a small AND + box filter graph");
    println!("  dot                   Print the demo graph in Graphviz DOT");
    println!("  and <a> <b> <out>     Bitwise AND of two images (converted to gray)");
    println!("  gray <in> <out>       Convert an image to 8-bit luma");
    println!("  help                  Show this help message");
    println!();
    println!("Set RUST_LOG=debug for runtime logging.");
}

fn list_targets() -> Result<()> {
    let ctx = Context::create()?;
    for (priority, name) in ctx.target_names().iter().enumerate() {
        let count = ctx.target_kernels(name)?.len();
        println!("{:>2}  {:<20} {} kernels", priority, name, count);
    }
    Ok(())
}

fn list_kernels(target: Option<&str>) -> Result<()> {
    let ctx = Context::create()?;
    let targets = match target {
        Some(t) => vec![t.to_string()],
        None => ctx.target_names(),
    };
    for name in targets {
        let kernels = ctx
            .target_kernels(&name)
            .with_context(|| format!("no target named {}", name))?;
        println!("{}:", name);
        for kernel in kernels {
            let info = ctx.query_kernel(ctx.get_kernel_by_name(&format!("{}:{}", name, kernel))?)?;
            println!("  {:#06x}  {} ({} params)", info.enumeration, info.name, info.parameters);
        }
    }
    Ok(())
}

/// AND of two patterned images followed by a 3x3 box filter.
fn demo_graph(ctx: &Context) -> Result<(Graph, Image)> {
    let (w, h) = (256, 128);
    let a = ctx.create_image(w, h, DfImage::U8)?;
    let b = ctx.create_image(w, h, DfImage::U8)?;
    let stripes: Vec<u8> = (0..w * h).map(|i| if (i % w) / 16 % 2 == 0 { 0xFF } else { 0x0F }).collect();
    let ramp: Vec<u8> = (0..w * h).map(|i| (i / w) as u8).collect();
    ctx.write_image_plane(a, 0, &stripes)?;
    ctx.write_image_plane(b, 0, &ramp)?;

    let graph = ctx.create_graph()?;
    let masked = ctx.create_virtual_image(graph, 0, 0, DfImage::Virt)?;
    let out = ctx.create_image(w, h, DfImage::U8)?;
    ctx.create_node_by_name(graph, &kernel_name("and"), &[Some(a.handle()), Some(b.handle()), Some(masked.handle())])?;
    let blur = ctx.create_node_by_name(graph, &kernel_name("box_3x3"), &[Some(masked.handle()), Some(out.handle())])?;
    ctx.set_node_attribute(blur, NodeAttribute::Border(Border::replicate()))?;
    Ok((graph, out))
}

fn run_demo() -> Result<()> {
    let ctx = Context::create()?;
    let (graph, out) = demo_graph(&ctx)?;
    ctx.verify_graph(graph).context("verification failed")?;
    ctx.process_graph(graph).context("run failed")?;

    let info = ctx.query_graph(graph)?;
    let pixels = ctx.read_image_plane(out, 0)?;
    let mean = pixels.iter().map(|p| u64::from(*p)).sum::<u64>() / pixels.len() as u64;
    println!("state: {:?}", info.state);
    println!("nodes: {}", info.nodes);
    println!("last run: {} us", info.perf.tmp / 1000);
    println!("output mean: {}", mean);
    Ok(())
}

fn print_dot() -> Result<()> {
    let ctx = Context::create()?;
    let (graph, _) = demo_graph(&ctx)?;
    ctx.verify_graph(graph)?;
    println!("{}", ctx.export_graph_dot(graph)?);
    Ok(())
}

/// `image` as U8, adding a conversion node to `graph` when needed.
fn as_gray(ctx: &Context, graph: Graph, image: Image) -> Result<Image> {
    if ctx.query_image(image)?.format == DfImage::U8 {
        return Ok(image);
    }
    let gray = ctx.create_virtual_image(graph, 0, 0, DfImage::U8)?;
    ctx.create_node_by_name(graph, &kernel_name("color_convert"), &[Some(image.handle()), Some(gray.handle())])?;
    Ok(gray)
}

fn and_files(a: &str, b: &str, out: &str) -> Result<()> {
    let ctx = Context::create()?;
    let (a, b) = (
        load_image(&ctx, a).with_context(|| format!("loading {}", a))?,
        load_image(&ctx, b).with_context(|| format!("loading {}", b))?,
    );
    let (ia, ib) = (ctx.query_image(a)?, ctx.query_image(b)?);
    if (ia.width, ia.height) != (ib.width, ib.height) {
        bail!("inputs differ in size: {}x{} and {}x{}", ia.width, ia.height, ib.width, ib.height);
    }

    let graph = ctx.create_graph()?;
    let (ga, gb) = (as_gray(&ctx, graph, a)?, as_gray(&ctx, graph, b)?);
    let result = ctx.create_image(ia.width, ia.height, DfImage::U8)?;
    ctx.create_node_by_name(graph, &kernel_name("and"), &[Some(ga.handle()), Some(gb.handle()), Some(result.handle())])?;
    ctx.process_graph(graph)?;
    save_image(&ctx, result, out)?;
    println!("wrote {}", out);
    Ok(())
}

fn gray_file(input: &str, out: &str) -> Result<()> {
    let ctx = Context::create()?;
    let image = load_image(&ctx, input).with_context(|| format!("loading {}", input))?;
    let info = ctx.query_image(image)?;
    if info.format == DfImage::U8 {
        save_image(&ctx, image, out)?;
    } else {
        let gray = ctx.create_image(info.width, info.height, DfImage::U8)?;
        let graph = ctx.create_graph()?;
        ctx.create_node_by_name(graph, &kernel_name("color_convert"), &[Some(image.handle()), Some(gray.handle())])?;
        ctx.process_graph(graph)?;
        save_image(&ctx, gray, out)?;
    }
    println!("wrote {}", out);
    Ok(())
}
