use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    // Vertex shader. Matches the pipeline vertex layout:
    //   - binding 0, location 0: R32G32B32_SFLOAT (pos)
    // and the uniform block the engine copies verbatim every frame:
    //   - set 0, binding 0: two row-major mat4 (view, proj)
    let vs_src = r#"
#version 450
layout(location = 0) in vec3 inPos;

layout(set = 0, binding = 0, row_major) uniform Camera {
    mat4 view;
    mat4 proj;
} u;

layout(location = 0) out vec3 vColor;

void main() {
    gl_Position = u.proj * u.view * vec4(inPos, 1.0);
    vColor = 0.5 + 0.5 * clamp(inPos, -1.0, 1.0);
}
"#;

    // Fragment shader: just write the color.
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
            "mesh.vert",
            "main",
            Some(&opts),
        )
        .unwrap();

    let fs_spv = comp
        .compile_into_spirv(
            fs_src,
            shaderc::ShaderKind::Fragment,
            "mesh.frag",
            "main",
            Some(&opts),
        )
        .unwrap();

    fs::write(out.join("mesh.vert.spv"), vs_spv.as_binary_u8()).unwrap();
    fs::write(out.join("mesh.frag.spv"), fs_spv.as_binary_u8()).unwrap();

    // Re-run if this file changes (inline sources live here)
    println!("cargo:rerun-if-changed=build.rs");
}
