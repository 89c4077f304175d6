mod app;
mod args;
mod build_info;
mod cmd_serve;
mod srv;

fn main() {
    app::exec()
}
