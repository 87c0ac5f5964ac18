#![cfg(target_arch = "wasm32")]

use std::rc::Rc;

use pixel_maze::{
    CoordinateArena, GpuResource, RenderError, ResourceRegistry, Texture, WebGl,
};
use wasm_bindgen::JsCast;
use wasm_bindgen_test::*;
use web_sys::{HtmlCanvasElement, WebGlRenderingContext as Gl};

wasm_bindgen_test_configure!(run_in_browser);

fn test_canvas(width: u32, height: u32) -> HtmlCanvasElement {
    let window = web_sys::window().expect("no window");
    let document = window.document().expect("no document");
    let canvas = document
        .create_element("canvas")
        .expect("create canvas")
        .dyn_into::<HtmlCanvasElement>()
        .expect("canvas element");
    canvas.set_width(width);
    canvas.set_height(height);
    canvas
}

fn assert_no_gl_error(renderer: &WebGl) {
    let gl = renderer.context().expect("renderer has a context");
    assert_eq!(gl.get_error(), Gl::NO_ERROR);
}

#[wasm_bindgen_test]
fn recreate_acquires_a_context_and_builds_the_pipeline() {
    let canvas = test_canvas(420, 210);
    let mut renderer = WebGl::new();

    let layout = renderer
        .recreate(&canvas, 210, 105)
        .expect("recreate succeeds");

    assert!(renderer.ready());
    assert_eq!(renderer.generation(), 1);
    assert!(renderer.context_version() == 1 || renderer.context_version() == 2);
    assert!(renderer.framebuffer_texture().is_some());
    // 210 rounds up to a 256-wide backing store.
    assert_eq!(layout.texture_width, 105);
    assert_eq!(layout.texture_height, 105);
    assert_no_gl_error(&renderer);
}

#[wasm_bindgen_test]
fn texture_dimensions_are_validated_at_bind_time() {
    let canvas = test_canvas(64, 64);
    let mut renderer = WebGl::new();
    renderer.recreate(&canvas, 32, 32).expect("recreate");
    let gl = renderer.context().expect("context").clone();

    assert!(matches!(
        Texture::for_render_target(&gl, 0, 16),
        Err(RenderError::InvalidDimensions { .. })
    ));
    assert!(matches!(
        Texture::for_render_target(&gl, 16, -1),
        Err(RenderError::InvalidDimensions { .. })
    ));
    assert!(matches!(
        Texture::for_render_target(&gl, 8192, 16),
        Err(RenderError::DimensionsTooLarge { .. })
    ));

    let texture = Texture::for_render_target(&gl, 16, 16).expect("valid texture");
    assert!(texture.loaded());
    texture.release();
    assert!(!texture.loaded());
    texture.load(&gl).expect("reload from retained size");
    assert!(texture.loaded());

    texture.destroy();
    assert!(!texture.loaded());
    assert!(matches!(texture.load(&gl), Err(RenderError::Destroyed)));
}

#[wasm_bindgen_test]
fn six_draws_through_a_capacity_of_four_flush_twice() {
    let canvas = test_canvas(64, 64);
    let mut renderer = WebGl::with_capacity(4);
    renderer.recreate(&canvas, 32, 32).expect("recreate");
    let gl = renderer.context().expect("context").clone();

    let mut coords = CoordinateArena::new(2);
    let model = coords.alloc_model();
    let texel = coords.alloc_texture();
    coords.set_model(model, 0.0, 0.0, 16.0, 16.0);
    coords.set_texture(texel, 0, 0, 16, 16);

    let texture = Texture::for_render_target(&gl, 16, 16).expect("texture");

    assert_eq!(renderer.flush_count(), 0);
    for _ in 0..6 {
        renderer.draw(&texture, &coords, model, 1.0, texel, 0.0, 0.0);
    }

    // The fifth draw overflowed the batch and flushed the first four.
    assert_eq!(renderer.flush_count(), 1);
    assert_eq!(renderer.pending_rectangles(), 2);
    assert_eq!(renderer.flushed_rectangles(), 4);

    renderer.flush();
    assert_eq!(renderer.flush_count(), 2);
    assert_eq!(renderer.pending_rectangles(), 0);
    assert_eq!(renderer.flushed_rectangles(), 6);
    assert_no_gl_error(&renderer);
}

#[wasm_bindgen_test]
fn switching_textures_flushes_the_previous_batch() {
    let canvas = test_canvas(64, 64);
    let mut renderer = WebGl::new();
    renderer.recreate(&canvas, 32, 32).expect("recreate");
    let gl = renderer.context().expect("context").clone();

    let mut coords = CoordinateArena::new(2);
    let model = coords.alloc_model();
    let texel = coords.alloc_texture();
    coords.set_model(model, 0.0, 0.0, 8.0, 8.0);
    coords.set_texture(texel, 0, 0, 8, 8);

    let first = Texture::for_render_target(&gl, 8, 8).expect("first texture");
    let second = Texture::for_render_target(&gl, 8, 8).expect("second texture");

    renderer.draw(&first, &coords, model, 1.0, texel, 0.0, 0.0);
    renderer.draw(&first, &coords, model, 1.0, texel, 8.0, 0.0);
    assert_eq!(renderer.flush_count(), 0);
    assert_eq!(renderer.pending_rectangles(), 2);

    renderer.draw(&second, &coords, model, 1.0, texel, 0.0, 0.0);
    assert_eq!(renderer.flush_count(), 1);
    assert_eq!(renderer.flushed_rectangles(), 2);
    assert_eq!(renderer.pending_rectangles(), 1);

    renderer.flush();
    assert_eq!(renderer.flush_count(), 2);
    assert_no_gl_error(&renderer);
}

#[wasm_bindgen_test]
fn flush_with_nothing_pending_is_a_no_op() {
    let canvas = test_canvas(64, 64);
    let mut renderer = WebGl::new();
    renderer.recreate(&canvas, 32, 32).expect("recreate");

    renderer.flush();
    renderer.flush();
    assert_eq!(renderer.flush_count(), 0);
    assert_eq!(renderer.flushed_rectangles(), 0);
    assert_no_gl_error(&renderer);
}

#[wasm_bindgen_test]
fn native_draws_adopt_prewritten_rectangles() {
    let canvas = test_canvas(64, 64);
    let mut renderer = WebGl::new();
    renderer.recreate(&canvas, 32, 32).expect("recreate");
    let gl = renderer.context().expect("context").clone();

    assert!(renderer.staging_base_ptr().is_some());

    let mut coords = CoordinateArena::new(2);
    let model = coords.alloc_model();
    let texel = coords.alloc_texture();
    coords.set_model(model, 0.0, 0.0, 8.0, 8.0);
    coords.set_texture(texel, 0, 0, 8, 8);

    let batched = Texture::for_render_target(&gl, 8, 8).expect("batched texture");
    let native = Texture::for_render_target(&gl, 8, 8).expect("native texture");

    renderer.draw(&batched, &coords, model, 1.0, texel, 0.0, 0.0);
    renderer.prepare_native_draw(&native);
    // The pending batched rectangle went out before the texture switch.
    assert_eq!(renderer.flush_count(), 1);
    assert_eq!(renderer.pending_rectangles(), 0);

    renderer.draw_native(3);
    assert_eq!(renderer.flush_count(), 2);
    assert_eq!(renderer.flushed_rectangles(), 4);
    assert_eq!(renderer.pending_rectangles(), 0);
    assert_no_gl_error(&renderer);
}

#[wasm_bindgen_test]
fn composition_switches_between_flushes() {
    let canvas = test_canvas(64, 64);
    let mut renderer = WebGl::new();
    renderer.recreate(&canvas, 32, 32).expect("recreate");
    let gl = renderer.context().expect("context").clone();

    let mut coords = CoordinateArena::new(2);
    let model = coords.alloc_model();
    let texel = coords.alloc_texture();
    coords.set_model(model, 0.0, 0.0, 8.0, 8.0);
    coords.set_texture(texel, 0, 0, 8, 8);

    let texture = Texture::for_render_target(&gl, 8, 8).expect("texture");

    renderer.set_sum_composition();
    renderer.draw(&texture, &coords, model, 1.0, texel, 0.0, 0.0);
    renderer.flush();

    renderer.set_default_composition();
    renderer.draw(&texture, &coords, model, 1.0, texel, 8.0, 8.0);
    renderer.flush();

    assert_eq!(renderer.flush_count(), 2);
    assert_eq!(renderer.flushed_rectangles(), 2);
    assert_no_gl_error(&renderer);
}

#[wasm_bindgen_test]
fn registry_releases_and_reloads_textures_as_a_group() {
    let canvas = test_canvas(64, 64);
    let mut renderer = WebGl::new();
    renderer.recreate(&canvas, 32, 32).expect("recreate");
    let gl = renderer.context().expect("context").clone();

    let mut registry = ResourceRegistry::new();
    let first = Rc::new(Texture::for_render_target(&gl, 8, 8).expect("first texture"));
    let second = Rc::new(Texture::for_render_target(&gl, 16, 16).expect("second texture"));
    registry.add("first", first.clone()).unwrap();
    registry.add("second", second.clone()).unwrap();
    assert!(registry.loaded());

    registry.release();
    assert!(!first.loaded());
    assert!(!second.loaded());
    assert!(!registry.loaded());

    registry.load(&gl).expect("bulk reload");
    assert!(registry.loaded());
    assert!(first.loaded());
    assert!(second.loaded());
}

#[wasm_bindgen_test]
fn recovery_rebuilds_the_pipeline_and_reloads_textures() {
    let canvas = test_canvas(420, 210);
    let mut renderer = WebGl::new();
    renderer.recreate(&canvas, 210, 105).expect("first recreate");
    let first_generation = renderer.generation();
    let gl = renderer.context().expect("context").clone();

    let texture = Rc::new(Texture::for_render_target(&gl, 16, 16).expect("texture"));
    assert!(texture.loaded());

    // The same partial teardown a detected context loss performs.
    renderer.destroy(true);
    assert!(!renderer.ready());
    assert!(!renderer.begin_frame());

    renderer.recreate(&canvas, 210, 105).expect("second recreate");
    assert_eq!(renderer.generation(), first_generation + 1);

    let gl = renderer.context().expect("fresh context").clone();
    texture.release();
    texture.load(&gl).expect("rebind after recreation");
    assert!(texture.loaded());

    let mut coords = CoordinateArena::new(2);
    let model = coords.alloc_model();
    let texel = coords.alloc_texture();
    coords.set_model(model, 0.0, 0.0, 16.0, 16.0);
    coords.set_texture(texel, 0, 0, 16, 16);

    renderer.draw(&texture, &coords, model, 1.0, texel, 0.0, 0.0);
    renderer.flush();
    assert_eq!(renderer.flush_count(), 1);
    assert_no_gl_error(&renderer);
}
