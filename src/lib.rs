use std::cell::RefCell;
use std::rc::Rc;

use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;
use web_sys::{Document, Event, HtmlCanvasElement, HtmlImageElement, Window};

mod coords;
mod error;
mod resources;
mod sheet;
mod texture;
mod webgl;

pub use coords::{
    CoordinateArena, ModelCoordinates, SHEET_TEXTURE_HEIGHT, SHEET_TEXTURE_WIDTH,
    TextureCoordinates,
};
pub use error::RenderError;
pub use resources::{GpuResource, ResourceRegistry};
pub use sheet::{
    BACKGROUND_COUNT, BACKGROUND_SCALE, BACKGROUND_SCALE_RIGHT_SHIFT, BASE_WIDTH,
    CURSOR_CENTER_SIZE, CURSOR_TARGET_SIZE, ICON_RADIUS, ICON_SIZE, MAX_HEIGHT, MIN_HEIGHT,
    OBJECT_TYPE_COUNT, ObjectType, SpriteSheet, load_sheet_image,
};
pub use texture::{MAX_TEXTURE_SIZE, Texture};
pub use webgl::{
    BYTES_PER_RECTANGLE, BYTES_PER_VERTEX, FLOATS_PER_RECTANGLE, FLOATS_PER_VERTEX,
    FramebufferLayout, RECTANGLE_CAPACITY, WebGl, rectangle_indices,
};

const SHEET_IMAGE_URL: &str = "assets/images/sheet.png";
const RECREATE_RETRY_MS: i32 = 500;

// Drift of the 15 background strips, radians per second and starting phase.
const BACKGROUND_SPEED: [f32; BACKGROUND_COUNT] = [
    -0.323448710595,
    -0.25284227489,
    -0.10375589028,
    0.083438027429,
    0.421777038452,
    -0.08010490255,
    0.09233965204,
    0.11111773056,
    -0.0986772336,
    0.34906371698,
    -0.159196784014,
    0.077594377037,
    0.26219446536,
    -0.48731208284,
    -0.20998237505,
];
const BACKGROUND_START_ANGLE: [f32; BACKGROUND_COUNT] = [
    2.6801005635637623,
    3.123733790682447,
    4.688789377081845,
    4.565122887861444,
    4.849217466363887,
    1.6958008847711774,
    5.2925753510581925,
    5.410561473565799,
    4.092381111475114,
    0.6224345811245753,
    3.712125640626676,
    5.199928075083743,
    0.07661908925381677,
    1.650516844887934,
    3.3930304275987373,
];
const TWO_PI: f32 = 6.283185307;

struct App {
    canvas: HtmlCanvasElement,
    document: Document,
    renderer: WebGl,
    coords: CoordinateArena,
    sheet: SpriteSheet,
    resources: ResourceRegistry,
    sheet_image: Option<HtmlImageElement>,
    sheet_texture: Option<Rc<Texture>>,
    scale_factor: i32,
    base_height: i32,
    background_angle: [f32; BACKGROUND_COUNT],
    background_last_time: f64,
    animation_frame: Option<(i32, Closure<dyn FnMut(f64)>)>,
    recreate_timer: Option<i32>,
}

type SharedApp = Rc<RefCell<App>>;

fn window() -> Window {
    web_sys::window().expect("missing window")
}

fn set_render_status(document: &Document, status: &str) {
    if let Some(element) = document.document_element() {
        let _ = element.set_attribute("data-render-status", status);
    }
}

// Largest integer scale whose 420-wide play space still fits the viewport;
// the base height soaks up whatever is left, clamped to the supported range.
fn compute_layout(width_px: f64, height_px: f64) -> (i32, i32) {
    let mut scale_factor = 0;
    loop {
        scale_factor += 1;
        let base_width_px = (BASE_WIDTH * scale_factor) as f64;
        let base_height = (height_px.min(base_width_px) / scale_factor as f64).ceil() as i32;
        if base_height < MIN_HEIGHT || base_width_px > width_px {
            if scale_factor > 1 {
                scale_factor -= 1;
            }
            let base_width_px = (BASE_WIDTH * scale_factor) as f64;
            let base_height = ((height_px.min(base_width_px) / scale_factor as f64).ceil() as i32)
                .clamp(MIN_HEIGHT, MAX_HEIGHT);
            return (scale_factor, base_height);
        }
    }
}

fn update_geometry(app: &mut App) {
    let window = window();
    let device_pixel_ratio = window.device_pixel_ratio().max(1.0);
    let css_width = window
        .inner_width()
        .ok()
        .and_then(|value| value.as_f64())
        .unwrap_or(1.0)
        .max(1.0);
    let css_height = window
        .inner_height()
        .ok()
        .and_then(|value| value.as_f64())
        .unwrap_or(1.0)
        .max(1.0);

    let (scale_factor, base_height) =
        compute_layout(css_width * device_pixel_ratio, css_height * device_pixel_ratio);
    app.scale_factor = scale_factor;
    app.base_height = base_height;

    let width = (BASE_WIDTH * scale_factor) as u32;
    let height = (base_height * scale_factor) as u32;
    if app.canvas.width() != width {
        app.canvas.set_width(width);
    }
    if app.canvas.height() != height {
        app.canvas.set_height(height);
    }

    app.sheet.rescale(&mut app.coords, scale_factor, base_height);
}

// One frame: poll for context loss, render the animated backdrop into the
// offscreen framebuffer, then composite it onto the canvas. Returns false
// when the context is gone and a recreation has to be scheduled.
fn frame(app: &mut App, time: f64) -> bool {
    if !app.renderer.begin_frame() {
        return false;
    }

    let mut delta_ms = if app.background_last_time > 0.0 {
        (time - app.background_last_time) as f32
    } else {
        0.0
    };
    if delta_ms >= 33.0 {
        delta_ms = 33.0;
    }
    app.background_last_time = time;
    let delta_seconds = delta_ms * 0.001;

    if let Some(sheet_texture) = app.sheet_texture.clone() {
        let center_x = BASE_WIDTH as f32 * (BACKGROUND_SCALE * 0.5);
        let center_y = (app.base_height as f32 * (BACKGROUND_SCALE * 0.5)).trunc();

        app.renderer.draw(
            &sheet_texture,
            &app.coords,
            app.sheet.full_view_model,
            1.0,
            app.sheet.clear_backdrop_texture,
            0.0,
            0.0,
        );

        for i in (0..BACKGROUND_COUNT).rev() {
            let mut angle = app.background_angle[i] + BACKGROUND_SPEED[i] * delta_seconds * 0.25;
            if angle >= TWO_PI {
                angle -= TWO_PI;
            } else if angle <= -TWO_PI {
                angle += TWO_PI;
            }
            app.background_angle[i] = angle;

            app.renderer.draw_rotate(
                &sheet_texture,
                &app.coords,
                app.sheet.background_models[i],
                0.3,
                app.sheet.background_textures[i & 7],
                angle,
                center_x,
                center_y,
            );
        }
    }

    app.renderer.flush();
    app.renderer.use_framebuffer(false);

    if let Some(framebuffer_texture) = app.renderer.framebuffer_texture() {
        app.renderer.draw(
            &framebuffer_texture,
            &app.coords,
            app.sheet.full_view_model,
            1.0,
            app.sheet.framebuffer_texture,
            0.0,
            0.0,
        );
    }
    app.renderer.flush();

    true
}

fn cancel_frame(app: &mut App) {
    if let Some((id, _callback)) = app.animation_frame.take() {
        let _ = window().cancel_animation_frame(id);
    }
}

fn schedule_frame(state: &SharedApp) {
    if state.borrow().animation_frame.is_some() {
        return;
    }

    let callback_state = Rc::clone(state);
    let callback = Closure::wrap(Box::new(move |time: f64| {
        let ready = {
            let mut app = callback_state.borrow_mut();
            app.animation_frame = None;
            frame(&mut app, time)
        };

        if ready {
            schedule_frame(&callback_state);
        } else {
            {
                let mut app = callback_state.borrow_mut();
                app.background_last_time = 0.0;
                set_render_status(&app.document, "context_lost");
            }
            web_sys::console::warn_1(&"context not ready, scheduling recreation".into());
            schedule_recreate(&callback_state);
        }
    }) as Box<dyn FnMut(f64)>);

    if let Ok(id) = window().request_animation_frame(callback.as_ref().unchecked_ref()) {
        state.borrow_mut().animation_frame = Some((id, callback));
    }
}

fn schedule_recreate(state: &SharedApp) {
    if state.borrow().recreate_timer.is_some() {
        return;
    }

    let callback_state = Rc::clone(state);
    let callback = Closure::once_into_js(move || {
        callback_state.borrow_mut().recreate_timer = None;
        recreate_resources(&callback_state);
    });

    if let Ok(id) = window().set_timeout_with_callback_and_timeout_and_arguments_0(
        callback.unchecked_ref(),
        RECREATE_RETRY_MS,
    ) {
        state.borrow_mut().recreate_timer = Some(id);
    }
}

// Tear down and rebuild the whole GPU side: renderer first, then every
// registered resource against the fresh context. Failures reschedule the
// same attempt; context loss is expected to be transient.
fn recreate_resources(state: &SharedApp) {
    let succeeded = {
        let mut app = state.borrow_mut();
        let app = &mut *app;

        cancel_frame(app);
        app.resources.release();

        let desired_width = BASE_WIDTH >> BACKGROUND_SCALE_RIGHT_SHIFT;
        let desired_height = app.base_height >> BACKGROUND_SCALE_RIGHT_SHIFT;

        match app.renderer.recreate(&app.canvas, desired_width, desired_height) {
            Ok(layout) => {
                app.coords.set_texture(
                    app.sheet.framebuffer_texture,
                    0,
                    0,
                    layout.texture_width,
                    layout.texture_height,
                );
                app.renderer.clear_color(1.0, 1.0, 1.0, 1.0);

                match reload_resources(app) {
                    Ok(()) => {
                        set_render_status(&app.document, "running");
                        true
                    }
                    Err(error) => {
                        set_render_status(&app.document, "error");
                        web_sys::console::error_1(&JsValue::from(error));
                        false
                    }
                }
            }
            Err(error) => {
                set_render_status(&app.document, "context_lost");
                web_sys::console::warn_1(&JsValue::from(error));
                false
            }
        }
    };

    if succeeded {
        schedule_frame(state);
    } else {
        schedule_recreate(state);
    }
}

fn reload_resources(app: &mut App) -> Result<(), RenderError> {
    let Some(gl) = app.renderer.context() else {
        return Ok(());
    };

    // The sheet texture is created lazily: the image may finish decoding
    // before the first context exists.
    if app.sheet_texture.is_none() {
        if let Some(image) = app.sheet_image.clone() {
            let texture = Rc::new(Texture::from_image(gl, image, false)?);
            app.resources.add("sheet", texture.clone())?;
            app.sheet_texture = Some(texture);
        }
    }

    app.resources.load(gl)
}

fn start_impl() -> Result<(), JsValue> {
    let win = window();
    let document = win
        .document()
        .ok_or_else(|| JsValue::from_str("missing document"))?;

    let canvas = document
        .get_element_by_id("gl-canvas")
        .ok_or_else(|| JsValue::from_str("Missing canvas"))?
        .dyn_into::<HtmlCanvasElement>()?;

    let mut coords = CoordinateArena::new(SpriteSheet::SLOT_COUNT);
    let sheet = SpriteSheet::new(&mut coords);

    let state: SharedApp = Rc::new(RefCell::new(App {
        canvas,
        document: document.clone(),
        renderer: WebGl::new(),
        coords,
        sheet,
        resources: ResourceRegistry::new(),
        sheet_image: None,
        sheet_texture: None,
        scale_factor: 0,
        base_height: MIN_HEIGHT,
        background_angle: BACKGROUND_START_ANGLE,
        background_last_time: 0.0,
        animation_frame: None,
        recreate_timer: None,
    }));

    update_geometry(&mut state.borrow_mut());
    set_render_status(&document, "loading");

    let lost_state = Rc::clone(&state);
    let on_context_lost = Closure::wrap(Box::new(move |event: Event| {
        // Without preventDefault the browser never restores the context.
        event.prevent_default();
        {
            let mut app = lost_state.borrow_mut();
            cancel_frame(&mut app);
            app.background_last_time = 0.0;
            set_render_status(&app.document, "context_lost");
        }
        web_sys::console::warn_1(&"webglcontextlost".into());
        schedule_recreate(&lost_state);
    }) as Box<dyn FnMut(_)>);
    state.borrow().canvas.add_event_listener_with_callback(
        "webglcontextlost",
        on_context_lost.as_ref().unchecked_ref(),
    )?;
    on_context_lost.forget();

    let resize_state = Rc::clone(&state);
    let on_resize = Closure::wrap(Box::new(move |_event: Event| {
        let needs_recreate = {
            let mut app = resize_state.borrow_mut();
            update_geometry(&mut app);
            app.renderer.check_recreate(&app.canvas)
        };
        if needs_recreate {
            recreate_resources(&resize_state);
        }
    }) as Box<dyn FnMut(_)>);
    win.add_event_listener_with_callback("resize", on_resize.as_ref().unchecked_ref())?;
    on_resize.forget();

    let load_state = Rc::clone(&state);
    spawn_local(async move {
        match load_sheet_image(SHEET_IMAGE_URL).await {
            Ok(image) => {
                load_state.borrow_mut().sheet_image = Some(image);
                recreate_resources(&load_state);
            }
            Err(error) => {
                let app = load_state.borrow();
                set_render_status(&app.document, "error");
                web_sys::console::error_1(&JsValue::from(error));
            }
        }
    });

    Ok(())
}

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();

    if let Err(error) = start_impl() {
        if let Some(win) = web_sys::window() {
            if let Some(document) = win.document() {
                set_render_status(&document, "error");
            }
        }
        web_sys::console::error_1(&error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_picks_the_largest_fitting_scale() {
        // A 1x viewport: 420 wide exactly, height below the square cap.
        let (scale, base_height) = compute_layout(420.0, 300.0);
        assert_eq!(scale, 1);
        assert_eq!(base_height, 300);

        // Twice the width, plenty of height.
        let (scale, base_height) = compute_layout(840.0, 800.0);
        assert_eq!(scale, 2);
        assert_eq!(base_height, 400);
    }

    #[test]
    fn layout_clamps_the_base_height() {
        // Height dwarfs the width: the square cap applies.
        let (scale, base_height) = compute_layout(420.0, 5000.0);
        assert_eq!(scale, 1);
        assert_eq!(base_height, 420);

        // Tiny viewport still yields the minimum playable space.
        let (scale, base_height) = compute_layout(100.0, 100.0);
        assert_eq!(scale, 1);
        assert_eq!(base_height, MIN_HEIGHT);
    }
}
