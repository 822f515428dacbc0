use garnet2d::app::{run_app, WindowConfig};
use garnet2d::{Color, Rectangle, SamplerDesc, SamplerFilter};

/// Procedural checkerboard so the demo needs no asset files.
fn checkerboard(size: u32, cell: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let on = ((x / cell) + (y / cell)) % 2 == 0;
            let v = if on { 220 } else { 60 };
            pixels.extend_from_slice(&[v, v, v, 255]);
        }
    }
    pixels
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = WindowConfig {
        title: "garnet2d quads".to_string(),
        ..Default::default()
    };

    let mut resources = None;
    let mut angle = 0.0f32;

    run_app(config, move |engine, frame| {
        let (checker, white, sampler, ctx) = *resources.get_or_insert_with(|| {
            let checker = engine.register_texture(&checkerboard(64, 8), 64, 64);
            let white = engine.register_texture(&[255, 255, 255, 255], 1, 1);
            let sampler = engine.register_sampler(SamplerDesc {
                filter: SamplerFilter::Nearest,
                repeat: false,
            });
            let ctx = engine.create_transform_context();
            (checker, white, sampler, ctx)
        });

        angle += frame.delta_time;

        engine.begin_frame(Some(Color::new(0.08, 0.08, 0.1, 1.0)), None);

        // static checkered tiles, all one batch
        for i in 0..8 {
            let x = 40.0 + i as f32 * 90.0;
            engine.draw_rect(
                &ctx,
                checker,
                sampler,
                Rectangle::new(x, 60.0, 64.0, 64.0),
                [0.0, 0.0, 1.0, 1.0],
                Color::WHITE,
            );
        }

        // a spinning tinted square through the transform stack
        engine.push_transform(&ctx);
        engine.translate(&ctx, 400.0, 350.0);
        engine.rotate(&ctx, angle);
        engine.translate(&ctx, -60.0, -60.0);
        engine.draw_rect(
            &ctx,
            white,
            sampler,
            Rectangle::new(0.0, 0.0, 120.0, 120.0),
            [0.0, 0.0, 1.0, 1.0],
            Color::new(0.9, 0.4, 0.2, 1.0),
        );
        engine.pop_transform(&ctx);

        engine.end_frame();

        let stats = engine.stats();
        log::debug!(
            "frame: {} quads in {} batches, {} draw calls",
            stats.quads,
            stats.batches,
            stats.draw_calls
        );
    })?;

    Ok(())
}
