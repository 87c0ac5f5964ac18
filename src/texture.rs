use std::cell::RefCell;

use web_sys::{HtmlImageElement, WebGlRenderingContext as Gl, WebGlTexture};

use crate::error::RenderError;
use crate::resources::GpuResource;
use crate::webgl::{check_gl, clear_gl_errors};

// Hard cap below the driver limit; the game never needs more and a few
// mobile drivers report sizes they cannot actually back.
pub const MAX_TEXTURE_SIZE: i32 = 4096;

enum Backing {
    Image(HtmlImageElement),
    Blank { width: i32, height: i32 },
}

struct Inner {
    gl: Option<Gl>,
    backing: Option<Backing>,
    handle: Option<WebGlTexture>,
    width: i32,
    height: i32,
    destroyed: bool,
}

/// One GPU texture bound to either a decoded image or an empty backing store
/// (render targets). `release` keeps the image/size around so the texture can
/// be rebound against a freshly recreated context; `destroy` is terminal.
pub struct Texture {
    mirrored: bool,
    inner: RefCell<Inner>,
}

impl Texture {
    pub fn from_image(
        gl: &Gl,
        image: HtmlImageElement,
        mirrored: bool,
    ) -> Result<Texture, RenderError> {
        let texture = Texture {
            mirrored,
            inner: RefCell::new(Inner {
                gl: None,
                backing: Some(Backing::Image(image)),
                handle: None,
                width: 0,
                height: 0,
                destroyed: false,
            }),
        };
        texture.bind_backing(gl)?;
        Ok(texture)
    }

    pub fn for_render_target(gl: &Gl, width: i32, height: i32) -> Result<Texture, RenderError> {
        let texture = Texture {
            mirrored: false,
            inner: RefCell::new(Inner {
                gl: None,
                backing: Some(Backing::Blank { width, height }),
                handle: None,
                width: 0,
                height: 0,
                destroyed: false,
            }),
        };
        texture.bind_backing(gl)?;
        Ok(texture)
    }

    pub fn mirrored(&self) -> bool {
        self.mirrored
    }

    pub fn width(&self) -> i32 {
        self.inner.borrow().width
    }

    pub fn height(&self) -> i32 {
        self.inner.borrow().height
    }

    pub fn handle(&self) -> Option<WebGlTexture> {
        self.inner.borrow().handle.clone()
    }

    fn bind_backing(&self, gl: &Gl) -> Result<(), RenderError> {
        self.release();

        let mut inner = self.inner.borrow_mut();
        if inner.destroyed {
            return Err(RenderError::Destroyed);
        }

        let (width, height) = match &inner.backing {
            Some(Backing::Image(image)) => (image.width() as i32, image.height() as i32),
            Some(Backing::Blank { width, height }) => (*width, *height),
            None => return Err(RenderError::Destroyed),
        };

        inner.width = width;
        inner.height = height;

        if width <= 0 || height <= 0 {
            return Err(RenderError::InvalidDimensions { width, height });
        }

        let driver_max = gl
            .get_parameter(Gl::MAX_TEXTURE_SIZE)
            .ok()
            .and_then(|value| value.as_f64())
            .unwrap_or(0.0) as i32;
        let max = driver_max.min(MAX_TEXTURE_SIZE);
        if width > max || height > max {
            return Err(RenderError::DimensionsTooLarge { width, height, max });
        }

        clear_gl_errors(gl);

        let handle = gl
            .create_texture()
            .ok_or_else(|| RenderError::GpuAllocation("unable to create texture".to_string()))?;

        gl.bind_texture(Gl::TEXTURE_2D, Some(&handle));

        match &inner.backing {
            Some(Backing::Image(image)) => {
                gl.tex_image_2d_with_u32_and_u32_and_image(
                    Gl::TEXTURE_2D,
                    0,
                    Gl::RGBA as i32,
                    Gl::RGBA,
                    Gl::UNSIGNED_BYTE,
                    image,
                )?;
            }
            Some(Backing::Blank { width, height }) => {
                gl.tex_image_2d_with_i32_and_i32_and_i32_and_format_and_type_and_opt_u8_array(
                    Gl::TEXTURE_2D,
                    0,
                    Gl::RGBA as i32,
                    *width,
                    *height,
                    0,
                    Gl::RGBA,
                    Gl::UNSIGNED_BYTE,
                    None,
                )?;
            }
            None => return Err(RenderError::Destroyed),
        }

        gl.tex_parameteri(Gl::TEXTURE_2D, Gl::TEXTURE_MIN_FILTER, Gl::NEAREST as i32);
        gl.tex_parameteri(Gl::TEXTURE_2D, Gl::TEXTURE_MAG_FILTER, Gl::NEAREST as i32);

        if self.mirrored {
            // Tileable backgrounds; everything else stays clamped because
            // WebGL 1 cannot repeat non-power-of-two textures.
            gl.tex_parameteri(Gl::TEXTURE_2D, Gl::TEXTURE_WRAP_S, Gl::MIRRORED_REPEAT as i32);
            gl.tex_parameteri(Gl::TEXTURE_2D, Gl::TEXTURE_WRAP_T, Gl::MIRRORED_REPEAT as i32);
        } else {
            gl.tex_parameteri(Gl::TEXTURE_2D, Gl::TEXTURE_WRAP_S, Gl::CLAMP_TO_EDGE as i32);
            gl.tex_parameteri(Gl::TEXTURE_2D, Gl::TEXTURE_WRAP_T, Gl::CLAMP_TO_EDGE as i32);
        }

        check_gl(gl, "texture setup")?;

        inner.handle = Some(handle);
        inner.gl = Some(gl.clone());

        gl.bind_texture(Gl::TEXTURE_2D, None);

        Ok(())
    }
}

impl GpuResource for Texture {
    fn load(&self, gl: &Gl) -> Result<(), RenderError> {
        if self.inner.borrow().destroyed {
            return Err(RenderError::Destroyed);
        }
        self.bind_backing(gl)
    }

    fn release(&self) {
        let mut inner = self.inner.borrow_mut();
        if let (Some(gl), Some(handle)) = (&inner.gl, &inner.handle) {
            gl.delete_texture(Some(handle));
        }
        inner.handle = None;
    }

    fn destroy(&self) {
        self.release();
        let mut inner = self.inner.borrow_mut();
        inner.backing = None;
        inner.gl = None;
        inner.destroyed = true;
    }

    fn loaded(&self) -> bool {
        self.inner.borrow().handle.is_some()
    }
}
