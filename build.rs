fn main() {
    // Emits ESP-IDF link/search directives when building for the target;
    // a no-op for host-side test builds.
    embuild::espidf::sysenv::output();
}
