use wasm_bindgen_futures::JsFuture;
use web_sys::HtmlImageElement;

use crate::coords::{
    CoordinateArena, ModelCoordinates, SHEET_TEXTURE_HEIGHT, SHEET_TEXTURE_WIDTH,
    TextureCoordinates,
};
use crate::error::RenderError;

// Logical play space, in model pixels.
pub const BASE_WIDTH: i32 = 420;
pub const MIN_HEIGHT: i32 = BASE_WIDTH >> 1;
pub const MAX_HEIGHT: i32 = BASE_WIDTH << 1;

pub const ICON_SIZE: i32 = 12;
pub const ICON_RADIUS: i32 = ICON_SIZE >> 1;

pub const BACKGROUND_COUNT: usize = 15;
pub const BACKGROUND_SCALE: f32 = 0.5;
pub const BACKGROUND_SCALE_RIGHT_SHIFT: i32 = 1;

pub const CURSOR_CENTER_SIZE: i32 = 25;
pub const CURSOR_TARGET_SIZE: i32 = 25;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObjectType {
    Ball = 0,
    Goal = 1,
    Bomb = 2,
    Cucumber = 3,
}

pub const OBJECT_TYPE_COUNT: usize = 4;

// Vertical offsets of the 15 parallax strips, in rows of the pattern.
const BACKGROUND_ROWS: [f32; BACKGROUND_COUNT] = [
    20.0, 19.0, 18.0, 17.0, 16.0, 15.0, 14.0, 13.0, 12.0, 10.0, 8.0, 6.0, 4.0, 2.0, 0.0,
];

// left, top, width, height in sheet texels; the second fragment set sits 16
// texels to the right of the first.
const FRAGMENT_TEXELS: [(u32, u32, u32, u32); 8] = [
    (2, 17, 3, 3),
    (7, 17, 3, 3),
    (12, 17, 3, 4),
    (2, 22, 3, 3),
    (7, 22, 3, 4),
    (12, 23, 3, 4),
    (2, 27, 3, 4),
    (7, 28, 3, 3),
];

// pivot x, pivot y, width, height in model pixels before scaling.
const FRAGMENT_MODELS: [(f32, f32, f32, f32); 8] = [
    (1.0, 1.0, 3.0, 3.0),
    (1.0, 1.0, 3.0, 3.0),
    (1.0, 2.0, 3.0, 4.0),
    (1.0, 1.0, 3.0, 3.0),
    (1.0, 2.0, 3.0, 4.0),
    (1.0, 2.0, 3.0, 4.0),
    (1.0, 2.0, 3.0, 4.0),
    (1.0, 1.0, 3.0, 3.0),
];

/// The catalog of coordinate descriptors for the level sheet. Texel
/// rectangles are fixed at construction; model rectangles that depend on the
/// logical scale factor are refreshed by `rescale`.
pub struct SpriteSheet {
    scale_factor: i32,

    pub level_model: ModelCoordinates,
    pub full_sheet_texture: TextureCoordinates,
    pub framebuffer_texture: TextureCoordinates,

    pub background_models: [ModelCoordinates; BACKGROUND_COUNT],
    pub background_textures: [TextureCoordinates; 8],

    pub object_model: ModelCoordinates,
    object_textures: [TextureCoordinates; OBJECT_TYPE_COUNT],

    pub full_view_model: ModelCoordinates,
    pub explosion_backdrop_texture: TextureCoordinates,
    pub fade_backdrop_model: ModelCoordinates,
    pub fade_backdrop_texture: TextureCoordinates,
    pub fade_backdrop_sad_texture: TextureCoordinates,

    pub fragment_models: [ModelCoordinates; 8],
    pub fragment_textures: [TextureCoordinates; 16],

    pub cursor_center_model: ModelCoordinates,
    pub cursor_center_texture: TextureCoordinates,
    pub cursor_target_model: ModelCoordinates,
    pub cursor_target_texture: TextureCoordinates,

    pub face_model: ModelCoordinates,
    pub sad_face_texture: TextureCoordinates,
    pub happy_face_texture: TextureCoordinates,

    pub clear_backdrop_texture: TextureCoordinates,
}

impl SpriteSheet {
    pub const SLOT_COUNT: usize = 68;

    pub fn new(coords: &mut CoordinateArena) -> SpriteSheet {
        let mut sheet = SpriteSheet {
            scale_factor: 0,
            level_model: coords.alloc_model(),
            full_sheet_texture: coords.alloc_texture(),
            framebuffer_texture: coords.alloc_texture(),
            background_models: [(); BACKGROUND_COUNT].map(|_| coords.alloc_model()),
            background_textures: [(); 8].map(|_| coords.alloc_texture()),
            object_model: coords.alloc_model(),
            object_textures: [(); OBJECT_TYPE_COUNT].map(|_| coords.alloc_texture()),
            full_view_model: coords.alloc_model(),
            explosion_backdrop_texture: coords.alloc_texture(),
            fade_backdrop_model: coords.alloc_model(),
            fade_backdrop_texture: coords.alloc_texture(),
            fade_backdrop_sad_texture: coords.alloc_texture(),
            fragment_models: [(); 8].map(|_| coords.alloc_model()),
            fragment_textures: [(); 16].map(|_| coords.alloc_texture()),
            cursor_center_model: coords.alloc_model(),
            cursor_center_texture: coords.alloc_texture(),
            cursor_target_model: coords.alloc_model(),
            cursor_target_texture: coords.alloc_texture(),
            face_model: coords.alloc_model(),
            sad_face_texture: coords.alloc_texture(),
            happy_face_texture: coords.alloc_texture(),
            // Stays at the zeroed texel so a full-view draw acts as a fill.
            clear_backdrop_texture: coords.alloc_texture(),
        };
        sheet.setup_fixed_coordinates(coords);
        sheet
    }

    pub fn object_texture(&self, object_type: ObjectType) -> TextureCoordinates {
        self.object_textures[object_type as usize]
    }

    pub fn scale_factor(&self) -> i32 {
        self.scale_factor
    }

    fn setup_fixed_coordinates(&mut self, coords: &mut CoordinateArena) {
        coords.set_texture(
            self.full_sheet_texture,
            0,
            0,
            SHEET_TEXTURE_WIDTH,
            SHEET_TEXTURE_HEIGHT,
        );

        // The strips live in a half-scale space and are long enough to stay
        // on screen at any rotation angle.
        let background_width = (BASE_WIDTH << 1) >> BACKGROUND_SCALE_RIGHT_SHIFT;
        let background_height =
            (std::f32::consts::SQRT_2 * (BASE_WIDTH >> BACKGROUND_SCALE_RIGHT_SHIFT) as f32).ceil();
        for (model, row) in self.background_models.iter().zip(BACKGROUND_ROWS) {
            coords.set_model(
                *model,
                (background_width >> BACKGROUND_SCALE_RIGHT_SHIFT) as f32,
                -0.02 * row * BACKGROUND_SCALE * BASE_WIDTH as f32,
                background_width as f32,
                background_height,
            );
        }
        for (i, texture) in self.background_textures.iter().enumerate() {
            coords.set_texture(*texture, 3 + 6 * i as u32, 53, 2, 72);
        }

        let icon = ICON_SIZE as u32;
        coords.set_texture(self.object_textures[ObjectType::Ball as usize], 2, 2, icon, icon);
        coords.set_texture(self.object_textures[ObjectType::Goal as usize], 18, 2, icon, icon);
        coords.set_texture(self.object_textures[ObjectType::Bomb as usize], 34, 2, icon, icon);
        coords.set_texture(
            self.object_textures[ObjectType::Cucumber as usize],
            50,
            2,
            icon,
            icon,
        );

        coords.set_texture(self.explosion_backdrop_texture, 36, 20, 8, 8);
        coords.set_texture(self.fade_backdrop_texture, 52, 20, 8, 8);
        coords.set_texture(self.fade_backdrop_sad_texture, 52, 36, 8, 8);

        for (i, (left, top, width, height)) in FRAGMENT_TEXELS.iter().enumerate() {
            coords.set_texture(self.fragment_textures[i], *left, *top, *width, *height);
            coords.set_texture(self.fragment_textures[8 + i], 16 + *left, *top, *width, *height);
        }

        coords.set_texture(
            self.cursor_center_texture,
            66,
            2,
            CURSOR_CENTER_SIZE as u32,
            CURSOR_CENTER_SIZE as u32,
        );
        coords.set_texture(
            self.cursor_target_texture,
            98,
            2,
            CURSOR_TARGET_SIZE as u32,
            CURSOR_TARGET_SIZE as u32,
        );

        coords.set_texture(self.sad_face_texture, 96, 32, 31, 31);
        coords.set_texture(self.happy_face_texture, 96, 80, 31, 31);
    }

    /// Refresh the scale-dependent model descriptors. Texel rectangles index
    /// the sheet, not the screen, and never change. Idempotent for a given
    /// scale factor; the full-view rectangle also tracks the current base
    /// height, so it is always rewritten.
    pub fn rescale(&mut self, coords: &mut CoordinateArena, scale_factor: i32, base_height: i32) {
        let s = scale_factor as f32;
        let width = (BASE_WIDTH * scale_factor) as f32;
        let height = (base_height * scale_factor) as f32;

        if self.scale_factor == scale_factor {
            coords.set_model(self.full_view_model, 0.0, 0.0, width, height);
            return;
        }

        self.scale_factor = scale_factor;

        coords.set_model(
            self.object_model,
            (ICON_RADIUS * scale_factor) as f32,
            (ICON_RADIUS * scale_factor) as f32,
            (ICON_SIZE * scale_factor) as f32,
            (ICON_SIZE * scale_factor) as f32,
        );

        coords.set_model(self.full_view_model, 0.0, 0.0, width, height);
        coords.set_model(self.fade_backdrop_model, 0.0, 0.0, 8.0 * s, 8.0 * s);

        for (model, (pivot_x, pivot_y, model_width, model_height)) in
            self.fragment_models.iter().zip(FRAGMENT_MODELS)
        {
            coords.set_model(
                *model,
                pivot_x * s,
                pivot_y * s,
                model_width * s,
                model_height * s,
            );
        }

        coords.set_model(
            self.cursor_center_model,
            (CURSOR_CENTER_SIZE as f32 * 0.5 * s).trunc(),
            (CURSOR_CENTER_SIZE as f32 * 0.5 * s).trunc(),
            CURSOR_CENTER_SIZE as f32 * s,
            CURSOR_CENTER_SIZE as f32 * s,
        );
        coords.set_model(
            self.cursor_target_model,
            (CURSOR_TARGET_SIZE as f32 * 0.5 * s).trunc(),
            (CURSOR_TARGET_SIZE as f32 * 0.5 * s).trunc(),
            CURSOR_TARGET_SIZE as f32 * s,
            CURSOR_TARGET_SIZE as f32 * s,
        );

        coords.set_model(self.face_model, 15.0 * s, 15.0 * s, 31.0 * s, 31.0 * s);
    }
}

/// Await the sheet image decode before any texture is constructed from it.
pub async fn load_sheet_image(url: &str) -> Result<HtmlImageElement, RenderError> {
    let image = HtmlImageElement::new()?;
    image.set_src(url);
    JsFuture::from(image.decode()).await?;
    Ok(image)
}
