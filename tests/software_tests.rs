use garnet2d::{
    BackendKind, BackendPreference, Color, EngineConfig, GarnetEngine, Rectangle, RenderBackend,
    SamplerDesc, SamplerFilter, SoftwareBackend, TextureHandle,
};

const UV_FULL: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

fn small_config() -> EngineConfig {
    EngineConfig {
        width: 64,
        height: 64,
        preference: BackendPreference::Software,
        ..Default::default()
    }
}

fn backend() -> SoftwareBackend {
    SoftwareBackend::new(&small_config()).expect("software backend always initializes")
}

fn rect_corners(x: f32, y: f32, w: f32, h: f32) -> [f32; 8] {
    Rectangle::new(x, y, w, h).corners()
}

fn pixel(backend: &SoftwareBackend, x: u32, y: u32) -> (u8, u8, u8, u8) {
    let p = backend
        .target()
        .pixel(x, y)
        .expect("pixel inside the target")
        .demultiply();
    (p.red(), p.green(), p.blue(), p.alpha())
}

#[test]
fn clear_color_fills_the_target() {
    let mut backend = backend();
    backend.begin_frame(Some(Color::new(1.0, 0.0, 0.0, 1.0)), None);
    backend.end_frame();
    assert_eq!(pixel(&backend, 0, 0), (255, 0, 0, 255));
    assert_eq!(pixel(&backend, 63, 63), (255, 0, 0, 255));
}

#[test]
fn solid_quad_covers_exactly_its_rectangle() {
    let mut backend = backend();
    let white = backend.register_texture(&[255, 255, 255, 255], 1, 1);
    let sampler = backend.register_sampler(SamplerDesc::default());

    backend.begin_frame(Some(Color::BLACK), None);
    backend.draw_quad(
        white,
        sampler,
        &rect_corners(8.0, 8.0, 16.0, 16.0),
        &UV_FULL,
        &[Color::new(0.0, 1.0, 0.0, 1.0).packed(); 4],
    );
    backend.end_frame();

    let (r, g, b, _) = pixel(&backend, 16, 16);
    assert_eq!((r, g, b), (0, 255, 0), "inside the quad is tinted green");
    let (r, g, b, _) = pixel(&backend, 40, 40);
    assert_eq!((r, g, b), (0, 0, 0), "outside the quad keeps the clear color");
}

#[test]
fn textured_quad_samples_the_uv_window() {
    let mut backend = backend();
    // 2x1: left texel red, right texel blue
    let pixels = [255, 0, 0, 255, 0, 0, 255, 255];
    let texture = backend.register_texture(&pixels, 2, 1);
    let sampler = backend.register_sampler(SamplerDesc {
        filter: SamplerFilter::Nearest,
        repeat: false,
    });

    backend.begin_frame(Some(Color::BLACK), None);
    backend.draw_quad(
        texture,
        sampler,
        &rect_corners(0.0, 0.0, 32.0, 32.0),
        &UV_FULL,
        &[Color::WHITE.packed(); 4],
    );
    backend.end_frame();

    let (r, _, b, _) = pixel(&backend, 4, 16);
    assert!(r > 200 && b < 50, "left half samples the red texel, got r={r} b={b}");
    let (r, _, b, _) = pixel(&backend, 27, 16);
    assert!(b > 200 && r < 50, "right half samples the blue texel, got r={r} b={b}");
}

#[test]
fn unregistered_resources_drop_the_quad() {
    let mut backend = backend();
    let sampler = backend.register_sampler(SamplerDesc::default());

    backend.begin_frame(Some(Color::BLACK), None);
    backend.draw_quad(
        TextureHandle::new(),
        sampler,
        &rect_corners(0.0, 0.0, 10.0, 10.0),
        &UV_FULL,
        &[Color::WHITE.packed(); 4],
    );
    backend.end_frame();

    assert_eq!(backend.stats().quads, 0);
    assert_eq!(pixel(&backend, 5, 5), (0, 0, 0, 255));
}

#[test]
fn malformed_corner_slice_drops_the_quad() {
    let mut backend = backend();
    let white = backend.register_texture(&[255, 255, 255, 255], 1, 1);
    let sampler = backend.register_sampler(SamplerDesc::default());

    backend.begin_frame(Some(Color::BLACK), None);
    backend.draw_quad(
        white,
        sampler,
        &[0.0; 7],
        &UV_FULL,
        &[Color::WHITE.packed(); 4],
    );
    backend.end_frame();
    assert_eq!(backend.stats().quads, 0);
}

#[test]
fn same_pair_quads_land_in_one_batch_and_one_draw() {
    let mut backend = backend();
    let white = backend.register_texture(&[255, 255, 255, 255], 1, 1);
    let sampler = backend.register_sampler(SamplerDesc::default());

    backend.begin_frame(Some(Color::BLACK), None);
    for i in 0..3 {
        backend.draw_quad(
            white,
            sampler,
            &rect_corners(i as f32 * 12.0, 0.0, 10.0, 10.0),
            &UV_FULL,
            &[Color::WHITE.packed(); 4],
        );
    }
    backend.end_frame();

    let stats = backend.stats();
    assert_eq!(stats.quads, 3);
    assert_eq!(stats.batches, 1);
    assert_eq!(stats.draw_calls, 1);
}

#[test]
fn small_pool_flushes_mid_frame_without_losing_quads() {
    let config = EngineConfig {
        pool_capacity: 2,
        ..small_config()
    };
    let mut backend = SoftwareBackend::new(&config).unwrap();
    let white = backend.register_texture(&[255, 255, 255, 255], 1, 1);
    let sampler = backend.register_sampler(SamplerDesc::default());

    backend.begin_frame(Some(Color::BLACK), None);
    for i in 0..5 {
        backend.draw_quad(
            white,
            sampler,
            &rect_corners(i as f32 * 12.0, 0.0, 8.0, 8.0),
            &UV_FULL,
            &[Color::WHITE.packed(); 4],
        );
    }
    backend.end_frame();

    let stats = backend.stats();
    assert_eq!(stats.quads, 5);
    assert!(
        stats.draw_calls >= 2,
        "overflow must force a mid-frame flush, got {} draws",
        stats.draw_calls
    );
    // the first quad, drawn before the mid-frame flush, survives on screen
    assert_eq!(pixel(&backend, 4, 4), (255, 255, 255, 255));
}

#[test]
fn unchanged_projection_is_not_reapplied() {
    let mut backend = backend();
    backend.begin_frame(Some(Color::BLACK), None);
    backend.end_frame();
    backend.begin_frame(Some(Color::BLACK), None);
    backend.end_frame();
    assert_eq!(backend.projection_uploads(), 1);
}

#[test]
#[should_panic(expected = "draw_quad called without an open frame")]
fn drawing_without_a_frame_panics() {
    let mut backend = backend();
    let white = backend.register_texture(&[255, 255, 255, 255], 1, 1);
    let sampler = backend.register_sampler(SamplerDesc::default());
    backend.draw_quad(
        white,
        sampler,
        &rect_corners(0.0, 0.0, 8.0, 8.0),
        &UV_FULL,
        &[Color::WHITE.packed(); 4],
    );
}

#[test]
fn facade_routes_draw_rect_through_the_transform_stack() {
    let mut engine = GarnetEngine::headless(&small_config()).unwrap();
    assert_eq!(engine.backend_kind(), BackendKind::Software);

    let white = engine.register_texture(&[255, 255, 255, 255], 1, 1);
    let sampler = engine.register_sampler(SamplerDesc::default());
    let ctx = engine.create_transform_context();

    engine.begin_frame(Some(Color::BLACK), None);
    engine.push_transform(&ctx);
    engine.translate(&ctx, 20.0, 20.0);
    engine.draw_rect(
        &ctx,
        white,
        sampler,
        Rectangle::new(0.0, 0.0, 8.0, 8.0),
        [0.0, 0.0, 1.0, 1.0],
        Color::new(1.0, 1.0, 0.0, 1.0),
    );
    engine.pop_transform(&ctx);
    engine.end_frame();

    let stats = engine.stats();
    assert_eq!(stats.quads, 1);
    assert_eq!(stats.batches, 1);
}

#[test]
fn maintain_caches_reaps_unregistered_resources() {
    let mut backend = backend();
    let white = backend.register_texture(&[255, 255, 255, 255], 1, 1);
    let sampler = backend.register_sampler(SamplerDesc::default());

    backend.begin_frame(None, None);
    backend.draw_quad(
        white,
        sampler,
        &rect_corners(0.0, 0.0, 8.0, 8.0),
        &UV_FULL,
        &[Color::WHITE.packed(); 4],
    );
    backend.end_frame();

    backend.unregister_texture(white);
    backend.maintain_caches();

    // the handle is gone; further draws with it are dropped, not fatal
    backend.begin_frame(None, None);
    backend.draw_quad(
        white,
        sampler,
        &rect_corners(0.0, 0.0, 8.0, 8.0),
        &UV_FULL,
        &[Color::WHITE.packed(); 4],
    );
    backend.end_frame();
    assert_eq!(backend.stats().quads, 0);
}
