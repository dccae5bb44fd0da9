use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    // Vertex shader: one unit quad per cell instance.
    // NOTE: Matches life_render::schema:
    //   - binding 0, location 0: R32G32_SFLOAT (quad corner, per vertex)
    //   - binding 1, location 1: R32G32_SFLOAT (cell position, per instance)
    //   - binding 1, location 2: R32_UINT      (alive flag, per instance)
    //   - set 0, binding 0: Camera { vec2 center; float zoom; }
    //   - constant_id 0: grid side length
    let vs_src = r#"
#version 450
layout(constant_id = 0) const uint GRID_SIZE = 1000u;

layout(location = 0) in vec2 inCorner;
layout(location = 1) in vec2 inCellPos;
layout(location = 2) in uint inAlive;

layout(set = 0, binding = 0) uniform Camera { vec2 center; float zoom; } cam;

layout(location = 0) out vec3 vColor;

void main() {
    vec2 world = inCellPos + inCorner;
    vec2 ndc = (world - cam.center) * (2.0 * cam.zoom / float(GRID_SIZE));
    gl_Position = vec4(ndc.x, -ndc.y, 0.0, 1.0);
    vColor = inAlive != 0u ? vec3(0.92, 0.92, 0.85) : vec3(0.06, 0.06, 0.09);
}
"#;

    let fs_src = r#"
#version 450
layout(location = 0) in vec3 vColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor, 1.0);
}
"#;

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();

    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let vs_spv = comp
        .compile_into_spirv(
            vs_src,
            shaderc::ShaderKind::Vertex,
            "cells.vert",
            "main",
            Some(&opts),
        )
        .unwrap();

    let fs_spv = comp
        .compile_into_spirv(
            fs_src,
            shaderc::ShaderKind::Fragment,
            "cells.frag",
            "main",
            Some(&opts),
        )
        .unwrap();

    fs::write(out.join("cells.vert.spv"), vs_spv.as_binary_u8()).unwrap();
    fs::write(out.join("cells.frag.spv"), fs_spv.as_binary_u8()).unwrap();

    // Runtime default for the shader directory; the binaries are read from disk.
    println!("cargo:rustc-env=LIFE_SHADER_DIR={}", out.display());
    println!("cargo:rerun-if-changed=build.rs");
}
